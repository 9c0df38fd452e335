//! The residual randomization engine. Every nested model is fit once to the
//! observed data; each permutation then builds pseudo responses from fixed
//! fitted values plus reordered residuals and projects them through the
//! cached projectors.

use crate::{
    decompose::Decomposition,
    design::DesignMatrix,
    error::{RrppError, RrppResult, RrppWarning},
    executor::Executor,
    fit::{
        options::{FitOptions, InversePolicy},
        transform::CovarianceTransform,
        Fit,
    },
    permutation::PermutationSchedule,
    sscp::{sscp_statistics, SscpResult},
    utility::{crossprod, sum_sq},
};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Term sums of squares at or below this fraction of the pseudo response's
/// sum of squares are set to exactly zero.
pub const SS_ROUNDOFF: f64 = 1e-12;

/// Which residuals are permuted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Randomization {
    /// Each term permutes the residuals of its own reduced model.
    Residuals,
    /// Every term permutes the residuals of the null (intercept-only) model,
    /// which amounts to permuting the raw responses.
    Full,
}

impl Default for Randomization {
    fn default() -> Self {
        Self::Residuals
    }
}

/// What the engine computes at each permutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub randomization: Randomization,
    /// Recover the full-model coefficients of every term.
    pub coefficients: bool,
    /// Compute SSCP matrices and their eigenvalues.
    pub sscp: bool,
    /// Inversion fallback for the residual SSCP matrix.
    pub inverse_policy: InversePolicy,
}

/// Degrees of freedom and status of a tested term.
#[derive(Debug, Clone, PartialEq)]
pub struct TermInfo {
    pub name: String,
    /// Rank of the full model minus rank of the reduced model.
    pub df: usize,
    /// The reduced and full models coincide.
    pub degenerate: bool,
}

/// The observed fits of one nested pair, shared read-only by every
/// permutation.
#[derive(Debug, Clone)]
pub struct TermModels {
    info: TermInfo,
    reduced: Fit,
    full: Fit,
    /// Rows of the full model's coefficients that belong to the term.
    added_rows: Vec<usize>,
    /// `R^{-1} Q^T` of the full model when coefficients are requested.
    hat: Option<Array2<f64>>,
}

impl TermModels {
    pub fn info(&self) -> &TermInfo {
        &self.info
    }

    pub fn reduced(&self) -> &Fit {
        &self.reduced
    }

    pub fn full(&self) -> &Fit {
        &self.full
    }
}

/// The statistics of one permutation.
#[derive(Debug, Clone)]
pub struct PermutationResult {
    /// Explained sum of squares of each term's reduced model.
    pub ss_reduced: Array1<f64>,
    /// Explained sum of squares of each term's full model.
    pub ss_full: Array1<f64>,
    /// Residual sum of squares of the complete model fit to each term's
    /// pseudo response.
    pub rss: Array1<f64>,
    /// Residual sum of squares of the complete model under null-model
    /// randomization.
    pub rss_model: f64,
    /// Total sum of squares about the null model under the same
    /// randomization.
    pub tss: f64,
    /// Full-model coefficients of each term.
    pub coefficients: Option<Vec<Array2<f64>>>,
    /// Euclidean length of the coefficients unique to each term.
    pub coefficient_lengths: Option<Array1<f64>>,
    pub sscp: Option<Vec<SscpResult>>,
}

impl PermutationResult {
    /// The sum of squares of each term.
    pub fn ss(&self) -> Array1<f64> {
        &self.ss_full - &self.ss_reduced
    }
}

/// Permutation results gathered across the schedule. Column `j` of every
/// matrix holds permutation `j`, so column 0 is the observed data.
#[derive(Debug, Clone)]
pub struct Distributions {
    /// Term sums of squares, terms x permutations.
    pub ss: Array2<f64>,
    pub ss_reduced: Array2<f64>,
    pub ss_full: Array2<f64>,
    pub rss: Array2<f64>,
    pub rss_model: Array1<f64>,
    pub tss: Array1<f64>,
    /// Terms x permutations.
    pub coefficient_lengths: Option<Array2<f64>>,
    /// Indexed by permutation, then term.
    pub coefficients: Option<Vec<Vec<Array2<f64>>>>,
    /// Indexed by permutation, then term.
    pub sscp: Option<Vec<Vec<SscpResult>>>,
}

impl Distributions {
    pub fn from_results(n_terms: usize, results: Vec<PermutationResult>) -> Self {
        let n_perm = results.len();
        let ss_reduced = stack_columns(&results, n_terms, |r| &r.ss_reduced);
        let ss_full = stack_columns(&results, n_terms, |r| &r.ss_full);
        let rss = stack_columns(&results, n_terms, |r| &r.rss);
        let has_lengths = n_perm > 0 && results.iter().all(|r| r.coefficient_lengths.is_some());
        let coefficient_lengths = if has_lengths {
            let mut out = Array2::zeros((n_terms, n_perm));
            for (j, res) in results.iter().enumerate() {
                if let Some(lengths) = &res.coefficient_lengths {
                    out.column_mut(j).assign(lengths);
                }
            }
            Some(out)
        } else {
            None
        };
        let rss_model = results.iter().map(|r| r.rss_model).collect();
        let tss = results.iter().map(|r| r.tss).collect();
        let ss = &ss_full - &ss_reduced;

        let mut coefficients = Vec::with_capacity(n_perm);
        let mut sscp = Vec::with_capacity(n_perm);
        for res in results {
            coefficients.extend(res.coefficients);
            sscp.extend(res.sscp);
        }
        let coefficients = (coefficients.len() == n_perm && n_perm > 0).then_some(coefficients);
        let sscp = (sscp.len() == n_perm && n_perm > 0).then_some(sscp);

        Self {
            ss,
            ss_reduced,
            ss_full,
            rss,
            rss_model,
            tss,
            coefficient_lengths,
            coefficients,
            sscp,
        }
    }

    /// The number of permutations, observed included.
    pub fn n_perm(&self) -> usize {
        self.tss.len()
    }
}

/// Holds the cached fits and drives the permutations.
#[derive(Debug, Clone)]
pub struct RrppEngine {
    terms: Vec<TermModels>,
    complete: Fit,
    null: Fit,
    schedule: Arc<PermutationSchedule>,
    options: EngineOptions,
    warnings: Vec<RrppWarning>,
}

impl RrppEngine {
    /// Fit the null, complete, and every nested model to the observed
    /// response. Designs from a decomposition by SS type are used without a
    /// new rank screen, so that decomposition should be screened under the
    /// same transform (see [`decompose_transformed`]).
    ///
    /// [`decompose_transformed`]: crate::decompose::decompose_transformed
    pub fn new(
        y: ArrayView2<f64>,
        decomposition: &Decomposition,
        transform: Arc<CovarianceTransform>,
        offset: Option<ArrayView1<f64>>,
        schedule: Arc<PermutationSchedule>,
        options: EngineOptions,
        fit_options: FitOptions,
    ) -> RrppResult<Self> {
        if schedule.n_obs() != y.nrows() {
            return Err(RrppError::BadInput(format!(
                "schedule permutes {} rows but the response has {}",
                schedule.n_obs(),
                y.nrows()
            )));
        }
        // designs built from the shared screen reuse its column choice
        let fit_design = |design: &DesignMatrix, label: &str, screen: bool| -> RrppResult<Fit> {
            if design.ncols() == 0 {
                return Fit::empty(y, Arc::clone(&transform), offset);
            }
            let mut config = Fit::config(design.x(), y.view())
                .transform(Arc::clone(&transform))
                .rank_tol(fit_options.rank_tol)
                .inverse_policy(fit_options.inverse_policy)
                .screen(screen);
            if let Some(off) = offset.as_ref() {
                config = config.offset(off.view());
            }
            config.fit().map_err(|err| match err {
                RrppError::RankDeficiency { .. } => RrppError::RankDeficiency {
                    model: label.to_string(),
                },
                err => err,
            })
        };

        let null = fit_design(&decomposition.null, "null model", false)?;
        let complete = fit_design(&decomposition.complete, "complete model", false)?;
        // supplied pairs did not go through the shared screen
        let screen_pairs = decomposition.ss_type.is_none();
        let mut warnings = Vec::new();
        let mut terms = Vec::with_capacity(decomposition.pairs.len());
        for pair in &decomposition.pairs {
            let reduced_label = format!("reduced model of '{}'", pair.term());
            let reduced = fit_design(pair.reduced(), &reduced_label, screen_pairs)?;
            let full_label = format!("full model of '{}'", pair.term());
            if pair.full().ncols() == 0 {
                return Err(RrppError::RankDeficiency { model: full_label });
            }
            let full = fit_design(pair.full(), &full_label, screen_pairs)?;
            let df = full.rank().saturating_sub(reduced.rank());
            let degenerate = df == 0;
            if degenerate {
                let warning = RrppWarning::DegenerateTerm {
                    term: pair.term().to_string(),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
            }
            let added = pair.added_columns();
            let added_rows = full
                .kept_columns()
                .iter()
                .positions(|c| added.contains(c))
                .collect();
            let hat = if options.coefficients {
                Some(full.projector().hat()?)
            } else {
                None
            };
            log::debug!(
                "Term '{}': rank {} -> {} ({} df)",
                pair.term(),
                reduced.rank(),
                full.rank(),
                df
            );
            terms.push(TermModels {
                info: TermInfo {
                    name: pair.term().to_string(),
                    df,
                    degenerate,
                },
                reduced,
                full,
                added_rows,
                hat,
            });
        }

        Ok(Self {
            terms,
            complete,
            null,
            schedule,
            options,
            warnings,
        })
    }

    pub fn terms(&self) -> &[TermModels] {
        &self.terms
    }

    pub fn term_info(&self) -> Vec<TermInfo> {
        self.terms.iter().map(|t| t.info.clone()).collect()
    }

    pub fn complete(&self) -> &Fit {
        &self.complete
    }

    pub fn null(&self) -> &Fit {
        &self.null
    }

    pub fn schedule(&self) -> &Arc<PermutationSchedule> {
        &self.schedule
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn warnings(&self) -> &[RrppWarning] {
        &self.warnings
    }

    pub fn n_obs(&self) -> usize {
        self.schedule.n_obs()
    }

    /// Residual degrees of freedom of the complete model.
    pub fn df_resid(&self) -> usize {
        self.complete.df_resid()
    }

    /// Degrees of freedom of the total sum of squares.
    pub fn df_total(&self) -> usize {
        self.n_obs() - self.null.rank()
    }

    /// Evaluate every permutation of the schedule. The results are in
    /// schedule order, so entry 0 is the observed data.
    pub fn run<E: Executor>(
        &self,
        executor: &E,
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Vec<PermutationResult> {
        let total = self.schedule.len();
        log::info!(
            "Running {} permutations for {} term(s) ({:?} randomization)",
            self.schedule.iterations(),
            self.terms.len(),
            self.options.randomization
        );
        let done = AtomicUsize::new(0);
        let results = executor.map(total, |j| {
            let result = self.evaluate(self.schedule.get(j));
            let n_done = done.fetch_add(1, Ordering::Relaxed) + 1;
            log::trace!("Permutation {} finished ({}/{})", j, n_done, total);
            if let Some(report) = progress {
                report(n_done, total);
            }
            result
        });
        log::info!("Finished {} permutations", total);
        results
    }

    /// Run every permutation and gather the distributions.
    pub fn distributions<E: Executor>(
        &self,
        executor: &E,
        progress: Option<&(dyn Fn(usize, usize) + Sync)>,
    ) -> Distributions {
        Distributions::from_results(self.terms.len(), self.run(executor, progress))
    }

    /// The statistics of a single permutation of the rows.
    pub fn evaluate(&self, perm: &[usize]) -> PermutationResult {
        let n_terms = self.terms.len();
        let complete = self.complete.projector();

        let y_null = pseudo_response(&self.null, perm);
        let ss_null_y = sum_sq(y_null.view());
        let rss_model = ss_null_y - complete.explained_ss(y_null.view());
        let tss = ss_null_y - self.null.projector().explained_ss(y_null.view());

        let mut ss_reduced = Array1::zeros(n_terms);
        let mut ss_full = Array1::zeros(n_terms);
        let mut rss = Array1::zeros(n_terms);
        let mut coefficients = Vec::new();
        let mut lengths = Array1::zeros(n_terms);
        let mut sscp = Vec::new();

        for (i, term) in self.terms.iter().enumerate() {
            let y_term;
            let y = match self.options.randomization {
                Randomization::Residuals => {
                    y_term = pseudo_response(&term.reduced, perm);
                    y_term.view()
                }
                Randomization::Full => y_null.view(),
            };
            let total = sum_sq(y);
            let ss_r = term.reduced.projector().explained_ss(y);
            let ss_f = term.full.projector().explained_ss(y);
            // gains at rounding level are ties with the reduced model
            let tied = term.info.degenerate || ss_f - ss_r <= SS_ROUNDOFF * total;
            ss_reduced[i] = ss_r;
            ss_full[i] = if tied { ss_r } else { ss_f };
            rss[i] = total - complete.explained_ss(y);

            if let Some(hat) = &term.hat {
                let beta = hat.dot(&y);
                lengths[i] = beta
                    .select(Axis(0), &term.added_rows)
                    .fold(0., |acc, &b| acc + b * b)
                    .sqrt();
                coefficients.push(beta);
            }

            if self.options.sscp {
                let full_fitted = term.full.projector().fitted(y);
                let effect = if tied {
                    Array2::zeros(full_fitted.raw_dim())
                } else {
                    &full_fitted - &term.reduced.projector().fitted(y)
                };
                let h = crossprod(effect.view());
                let r = crossprod(term.full.projector().residuals(y).view());
                sscp.push(sscp_statistics(&h, &r, self.options.inverse_policy));
            }
        }

        PermutationResult {
            ss_reduced,
            ss_full,
            rss,
            rss_model,
            tss,
            coefficient_lengths: self.options.coefficients.then_some(lengths),
            coefficients: self.options.coefficients.then_some(coefficients),
            sscp: self.options.sscp.then_some(sscp),
        }
    }
}

/// Place one per-term vector of each permutation in its own column.
fn stack_columns<F>(results: &[PermutationResult], n_terms: usize, field: F) -> Array2<f64>
where
    F: Fn(&PermutationResult) -> &Array1<f64>,
{
    let mut out = Array2::zeros((n_terms, results.len()));
    for (j, res) in results.iter().enumerate() {
        out.column_mut(j).assign(field(res));
    }
    out
}

/// Transformed fitted values plus transformed residuals with their rows
/// reordered by `perm`.
fn pseudo_response(fit: &Fit, perm: &[usize]) -> Array2<f64> {
    fit.transformed_fitted() + &fit.transformed_residuals().select(Axis(0), perm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decompose::{decompose, SsType},
        design::Term,
        executor::Sequential,
        permutation::{PermutationSchedule, Seed},
    };
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn engine(options: EngineOptions) -> RrppResult<(RrppEngine, Array2<f64>)> {
        let group = array![[0.], [0.], [0.], [1.], [1.], [1.], [0.], [1.]];
        let cov = array![[0.3], [1.2], [-0.4], [0.8], [2.0], [0.1], [0.9], [-1.1]];
        let y = array![
            [1.1, 0.2],
            [1.9, 0.3],
            [0.7, -0.1],
            [3.2, 1.0],
            [3.9, 1.4],
            [2.8, 0.9],
            [1.5, 0.1],
            [2.9, 1.1]
        ];
        let design = crate::design::DesignMatrix::from_blocks(
            true,
            vec![(Term::new("g"), group), (Term::new("x"), cov)],
        )?;
        let decomposition = decompose(&design, SsType::Sequential, 1e-7)?;
        let schedule = Arc::new(PermutationSchedule::new(8, 30, Seed::Fixed(2), None)?);
        let engine = RrppEngine::new(
            y.view(),
            &decomposition,
            Arc::new(CovarianceTransform::Identity),
            None,
            schedule,
            options,
            FitOptions::default(),
        )?;
        Ok((engine, y))
    }

    #[test]
    fn observed_matches_direct_fit() -> RrppResult<()> {
        let (engine, y) = engine(EngineOptions::default())?;
        let results = engine.run(&Sequential, None);
        assert_eq!(results.len(), 31);
        let observed = &results[0];
        for (i, term) in engine.terms().iter().enumerate() {
            let direct = term.reduced().rss().sum() - term.full().rss().sum();
            assert_abs_diff_eq!(observed.ss()[i], direct, epsilon = 1e-10);
            assert_abs_diff_eq!(observed.rss[i], engine.complete().rss().sum(), epsilon = 1e-10);
        }
        let centered = crate::math::center_columns(&y);
        assert_abs_diff_eq!(observed.tss, sum_sq(centered.view()), epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn term_ss_never_negative() -> RrppResult<()> {
        let (engine, _) = engine(EngineOptions {
            randomization: Randomization::Full,
            ..EngineOptions::default()
        })?;
        let dist = engine.distributions(&Sequential, None);
        assert!(dist.ss.iter().all(|&ss| ss >= 0.));
        assert!(dist.rss_model.iter().zip(dist.tss.iter()).all(|(r, t)| r <= &(t + 1e-10)));
        Ok(())
    }

    #[test]
    fn coefficient_lengths_recorded() -> RrppResult<()> {
        let (engine, _) = engine(EngineOptions {
            coefficients: true,
            ..EngineOptions::default()
        })?;
        let dist = engine.distributions(&Sequential, None);
        let lengths = dist.coefficient_lengths.expect("lengths requested");
        assert_eq!(lengths.dim(), (2, 31));
        // the observed length of term "x" is the norm of its coefficient row
        let coefficients = dist.coefficients.expect("coefficients requested");
        let beta = &coefficients[0][1];
        assert_eq!(beta.dim(), (3, 2));
        let norm = beta.row(2).fold(0., |acc, &b| acc + b * b).sqrt();
        assert_abs_diff_eq!(lengths[[1, 0]], norm, epsilon = 1e-12);
        Ok(())
    }
}
