//! Collect data for and configure a permutation analysis

use crate::{
    decompose::{decompose_transformed, Decomposition, NestedModelPair, SsType},
    design::DesignMatrix,
    engine::{Distributions, EngineOptions, Randomization, RrppEngine, TermInfo},
    error::{InverseKind, RrppError, RrppResult, RrppWarning},
    executor::{Executor, Sequential},
    fit::{
        options::{FitOptions, InversePolicy},
        transform::CovarianceTransform,
        Fit,
    },
    permutation::{PermutationSchedule, Seed},
    sscp::{ManovaResult, PcaRetention, PrincipalComponents},
    stats::{anova, coefficient_test, AnovaOptions, AnovaTable, CoefficientRow},
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::Arc;

/// The number of random permutations when none is given.
pub const DEFAULT_ITERATIONS: usize = 999;

/// Progress callback receiving the number of finished permutations and the
/// total.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Holds the data and configuration of an analysis. Everything is validated
/// and every nested design is built when the model is built, before any
/// permutation work.
#[derive(Debug, Clone)]
pub struct Model {
    /// Observations in rows, response variables in columns.
    pub y: Array2<f64>,
    /// A known offset subtracted from every response column.
    pub offset: Option<Array1<f64>>,
    pub decomposition: Decomposition,
    pub transform: Arc<CovarianceTransform>,
    pub schedule: Arc<PermutationSchedule>,
    pub engine_options: EngineOptions,
    pub fit_options: FitOptions,
    /// Compute the multivariate statistics alongside the univariate ones.
    pub sscp: Option<PcaRetention>,
    pub warnings: Vec<RrppWarning>,
}

impl Model {
    /// Run the analysis on the calling thread.
    pub fn fit(self) -> RrppResult<RrppFit> {
        self.fit_with(&Sequential, None)
    }

    /// Run the analysis with the given executor, reporting progress through
    /// an optional callback.
    pub fn fit_with<E: Executor>(
        self,
        executor: &E,
        progress: Option<Progress>,
    ) -> RrppResult<RrppFit> {
        let engine = RrppEngine::new(
            self.y.view(),
            &self.decomposition,
            Arc::clone(&self.transform),
            self.offset.as_ref().map(|o| o.view()),
            Arc::clone(&self.schedule),
            self.engine_options,
            self.fit_options,
        )?;
        let distributions = engine.distributions(executor, progress);
        let mut warnings = self.warnings.clone();
        warnings.extend(engine.warnings().iter().cloned());
        let mut fit = RrppFit {
            model: self,
            engine,
            distributions,
            warnings,
            manova: None,
        };
        if let Some(retention) = fit.model.sscp {
            fit.manova = Some(fit.manova(retention, executor)?);
        }
        Ok(fit)
    }
}

/// Provides an interface to create the full model option struct.
pub struct ModelBuilder;

impl ModelBuilder {
    /// Borrow the response and the design, where each row in the arrays is a
    /// new observation, and create the model builder to allow adjusting
    /// additional options.
    pub fn data<'a>(
        data_y: ArrayView2<'a, f64>,
        design: &'a DesignMatrix,
    ) -> ModelBuilderData<'a> {
        ModelBuilderData {
            data_y,
            design,
            pairs: None,
            ss_type: SsType::default(),
            covariance: None,
            weights: None,
            offset: None,
            blocks: None,
            iterations: DEFAULT_ITERATIONS,
            seed: Seed::default(),
            schedule: None,
            randomization: Randomization::default(),
            coefficients: false,
            sscp: None,
            fit_options: FitOptions::default(),
        }
    }

    /// A single response variable.
    pub fn data_1d<'a>(
        data_y: ArrayView1<'a, f64>,
        design: &'a DesignMatrix,
    ) -> ModelBuilderData<'a> {
        Self::data(data_y.insert_axis(Axis(1)), design)
    }
}

/// Holds the data and all the specifications for the model and provides
/// functions to adjust the settings.
pub struct ModelBuilderData<'a> {
    data_y: ArrayView2<'a, f64>,
    design: &'a DesignMatrix,
    /// Nested pairs supplied directly instead of derived from the SS type.
    pairs: Option<Vec<NestedModelPair>>,
    ss_type: SsType,
    covariance: Option<ArrayView2<'a, f64>>,
    weights: Option<ArrayView1<'a, f64>>,
    offset: Option<ArrayView1<'a, f64>>,
    /// A block label per observation.
    blocks: Option<Vec<usize>>,
    iterations: usize,
    seed: Seed,
    schedule: Option<PermutationSchedule>,
    randomization: Randomization,
    coefficients: bool,
    sscp: Option<PcaRetention>,
    fit_options: FitOptions,
}

impl<'a> ModelBuilderData<'a> {
    /// Test these nested pairs instead of decomposing the design. The design
    /// still provides the complete and null models.
    pub fn terms(mut self, pairs: Vec<NestedModelPair>) -> Self {
        self.pairs = Some(pairs);
        self
    }

    pub fn ss_type(mut self, ss_type: SsType) -> Self {
        self.ss_type = ss_type;
        self
    }

    /// Generalized least squares with this residual covariance among
    /// observations. Takes precedence over weights.
    pub fn covariance(mut self, covariance: ArrayView2<'a, f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Weighted least squares.
    pub fn weights(mut self, weights: ArrayView1<'a, f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Represents an offset subtracted from every response column before
    /// fitting. The fitted values include it.
    pub fn offset(mut self, offset: ArrayView1<'a, f64>) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Restrict permutations to rows sharing a block label.
    pub fn blocks(mut self, labels: &[usize]) -> Self {
        self.blocks = Some(labels.to_vec());
        self
    }

    /// Number of random permutations after the observed arrangement.
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    /// Use a schedule generated elsewhere, e.g. one shared with a model this
    /// one will be compared with. Overrides iterations, seed, and blocks.
    pub fn schedule(mut self, schedule: PermutationSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn randomization(mut self, randomization: Randomization) -> Self {
        self.randomization = randomization;
        self
    }

    /// Record the coefficients of every full model under every permutation.
    pub fn coefficients(mut self, coefficients: bool) -> Self {
        self.coefficients = coefficients;
        self
    }

    /// Also compute SSCP matrices and multivariate statistics on the
    /// principal components of the response.
    pub fn sscp(mut self, retention: PcaRetention) -> Self {
        self.sscp = Some(retention);
        self
    }

    /// Set the aliasing tolerance of the rank screen.
    pub fn rank_tolerance(mut self, tol: f64) -> Self {
        self.fit_options.rank_tol = tol;
        self
    }

    /// Set the fallback for singular covariance and SSCP matrices.
    pub fn inverse_policy(mut self, policy: InversePolicy) -> Self {
        self.fit_options.inverse_policy = policy;
        self
    }

    pub fn build(self) -> RrppResult<Model> {
        let n_data = self.data_y.nrows();
        if n_data != self.design.nrows() {
            return Err(RrppError::BadInput(
                "y and design must have same number of points".to_string(),
            ));
        }
        if self.data_y.ncols() == 0 {
            return Err(RrppError::BadInput("y has no variables".to_string()));
        }
        if self.data_y.iter().any(|v| !v.is_finite()) {
            return Err(RrppError::BadInput("y must be finite".to_string()));
        }
        if let Some(offset) = self.offset {
            if offset.len() != n_data {
                return Err(RrppError::BadInput(
                    "Offsets must have same dimension as observations".to_string(),
                ));
            }
        }
        if let Some(w) = self.weights {
            if w.len() != n_data {
                return Err(RrppError::BadInput(
                    "Weights must have same dimension as observations".to_string(),
                ));
            }
        }
        if let Some(cov) = self.covariance {
            if cov.nrows() != n_data {
                return Err(RrppError::BadInput(format!(
                    "covariance is {}x{} for {} observations",
                    cov.nrows(),
                    cov.ncols(),
                    n_data
                )));
            }
        }
        if self.fit_options.rank_tol < 0. {
            return Err(RrppError::BadInput(
                "rank tolerance must be non-negative".to_string(),
            ));
        }
        if let InversePolicy::Regularized(lambda) = self.fit_options.inverse_policy {
            if !(lambda > 0. && lambda <= 1.) {
                return Err(RrppError::BadInput(format!(
                    "shrinkage must be in (0, 1], got {}",
                    lambda
                )));
            }
        }

        let mut transform_warnings = Vec::new();
        let transform = if let Some(cov) = self.covariance {
            if self.weights.is_some() {
                log::warn!("Both a covariance and weights were supplied; the weights are ignored");
            }
            let (transform, how) =
                CovarianceTransform::from_covariance(cov, self.fit_options.inverse_policy)?;
            if how != InverseKind::Exact {
                let warning = RrppWarning::SingularCovarianceRecovered { how };
                log::warn!("{}", warning);
                transform_warnings.push(warning);
            }
            transform
        } else if let Some(w) = self.weights {
            CovarianceTransform::from_weights(w)?
        } else {
            CovarianceTransform::Identity
        };

        let rank_tol = self.fit_options.rank_tol;
        let decomposition = match self.pairs {
            Some(pairs) => {
                Decomposition::from_pairs_transformed(self.design, pairs, rank_tol, &transform)?
            }
            None => decompose_transformed(self.design, self.ss_type, rank_tol, &transform)?,
        };
        let mut warnings = decomposition.warnings.clone();
        warnings.extend(transform_warnings);

        let schedule = match self.schedule {
            Some(schedule) => {
                if schedule.n_obs() != n_data {
                    return Err(RrppError::BadInput(format!(
                        "schedule permutes {} rows for {} observations",
                        schedule.n_obs(),
                        n_data
                    )));
                }
                schedule
            }
            None => PermutationSchedule::new(
                n_data,
                self.iterations,
                self.seed,
                self.blocks.as_deref(),
            )?,
        };

        Ok(Model {
            y: self.data_y.to_owned(),
            offset: self.offset.map(|o| o.to_owned()),
            decomposition,
            transform: Arc::new(transform),
            schedule: Arc::new(schedule),
            engine_options: EngineOptions {
                randomization: self.randomization,
                coefficients: self.coefficients,
                sscp: false,
                inverse_policy: self.fit_options.inverse_policy,
            },
            fit_options: self.fit_options,
            sscp: self.sscp,
            warnings,
        })
    }
}

/// The observed fits of an analysis with the permutation distributions of
/// every statistic.
#[derive(Debug, Clone)]
pub struct RrppFit {
    model: Model,
    engine: RrppEngine,
    distributions: Distributions,
    warnings: Vec<RrppWarning>,
    manova: Option<ManovaResult>,
}

impl RrppFit {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn engine(&self) -> &RrppEngine {
        &self.engine
    }

    pub fn distributions(&self) -> &Distributions {
        &self.distributions
    }

    pub fn warnings(&self) -> &[RrppWarning] {
        &self.warnings
    }

    pub fn terms(&self) -> Vec<TermInfo> {
        self.engine.term_info()
    }

    pub fn schedule(&self) -> &PermutationSchedule {
        &self.model.schedule
    }

    pub fn n_obs(&self) -> usize {
        self.model.y.nrows()
    }

    pub fn df_resid(&self) -> usize {
        self.engine.df_resid()
    }

    /// The fit of the complete model to the observed data.
    pub fn complete(&self) -> &Fit {
        self.engine.complete()
    }

    /// The multivariate results requested when the model was built.
    pub fn sscp(&self) -> Option<&ManovaResult> {
        self.manova.as_ref()
    }

    /// The ANOVA table of the analysis.
    pub fn anova(&self, options: &AnovaOptions) -> RrppResult<AnovaTable> {
        anova(
            &self.engine.term_info(),
            &self.distributions,
            self.engine.df_resid(),
            self.engine.df_total(),
            options,
        )
    }

    /// Test the length of each term's coefficients. The model must have been
    /// built with coefficients recorded.
    pub fn coefficient_test(&self) -> RrppResult<Vec<CoefficientRow>> {
        coefficient_test(&self.engine.term_info(), &self.distributions)
    }

    /// Rerun the schedule on the principal components of the response and
    /// compute SSCP matrices for every term and permutation. The number of
    /// components is capped at the residual degrees of freedom.
    pub fn manova<E: Executor>(
        &self,
        retention: PcaRetention,
        executor: &E,
    ) -> RrppResult<ManovaResult> {
        let y = match &self.model.offset {
            Some(offset) => &self.model.y - &offset.view().insert_axis(Axis(1)),
            None => self.model.y.clone(),
        };
        let df_resid = self.engine.df_resid();
        let pca = PrincipalComponents::new(y.view(), retention, df_resid)?;
        log::info!(
            "SSCP analysis on {} of {} principal component(s)",
            pca.n_components(),
            y.ncols()
        );
        let engine = RrppEngine::new(
            pca.scores.view(),
            &self.model.decomposition,
            Arc::clone(&self.model.transform),
            None,
            Arc::clone(&self.model.schedule),
            EngineOptions {
                sscp: true,
                coefficients: false,
                ..self.model.engine_options
            },
            self.model.fit_options,
        )?;
        let dist = engine.distributions(executor, None);
        let sscp = dist.sscp.ok_or_else(|| {
            RrppError::BadInput("the schedule produced no permutations".to_string())
        })?;
        Ok(ManovaResult {
            terms: engine.term_info(),
            pca,
            sscp,
            df_resid,
        })
    }
}
