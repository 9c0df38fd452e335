//! Turn permutation distributions into ANOVA tables: mean squares, F ratios,
//! R², effect sizes, and permutation p-values.

use crate::{
    engine::{Distributions, TermInfo},
    error::{RrppError, RrppResult},
    math::{effect_size, log_effect_size, p_value},
};
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// The statistic whose distribution gives the effect size and p-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectType {
    F,
    SS,
    MS,
    Rsq,
    /// Cohen's f², `R² / (1 - R²)`.
    CohenF,
}

impl Default for EffectType {
    fn default() -> Self {
        Self::F
    }
}

/// The denominator of a term's F ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTerm {
    /// Residual mean square of the complete model.
    Residuals,
    /// Mean square of another term, as in mixed-model tests.
    Term(String),
}

#[derive(Debug, Clone, Default)]
pub struct AnovaOptions {
    pub effect_type: EffectType,
    /// One entry per term. Residuals are used for every term when unset.
    pub error_terms: Option<Vec<ErrorTerm>>,
}

impl AnovaOptions {
    pub fn effect_type(mut self, effect_type: EffectType) -> Self {
        self.effect_type = effect_type;
        self
    }

    pub fn error_terms(mut self, error_terms: Vec<ErrorTerm>) -> Self {
        self.error_terms = Some(error_terms);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnovaRow {
    pub term: String,
    pub df: usize,
    pub ss: f64,
    pub ms: f64,
    pub rsq: f64,
    pub f: f64,
    pub z: f64,
    pub p: f64,
    /// `z` is on the log scale. False when the distribution holds zeros.
    pub log_scale: bool,
    /// Reduced and full models coincide; the statistics are NaN.
    pub degenerate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnovaTable {
    pub rows: Vec<AnovaRow>,
    pub df_resid: usize,
    pub rss: f64,
    pub df_total: usize,
    pub tss: f64,
    pub effect_type: EffectType,
    /// Permutations, observed included.
    pub n_perm: usize,
}

impl AnovaTable {
    pub fn row(&self, term: &str) -> Option<&AnovaRow> {
        self.rows.iter().find(|r| r.term == term)
    }

    /// Residual mean square.
    pub fn ms_resid(&self) -> f64 {
        self.rss / self.df_resid as f64
    }
}

/// Per-permutation statistics for every term, terms x permutations.
#[derive(Debug, Clone)]
pub struct TermStatistics {
    pub ss: Array2<f64>,
    pub ms: Array2<f64>,
    pub rsq: Array2<f64>,
    pub f: Array2<f64>,
    pub cohen_f: Array2<f64>,
}

impl TermStatistics {
    pub fn of(&self, effect_type: EffectType) -> &Array2<f64> {
        match effect_type {
            EffectType::F => &self.f,
            EffectType::SS => &self.ss,
            EffectType::MS => &self.ms,
            EffectType::Rsq => &self.rsq,
            EffectType::CohenF => &self.cohen_f,
        }
    }
}

/// Compute mean squares, R², and F ratios at every permutation.
pub fn term_statistics(
    terms: &[TermInfo],
    dist: &Distributions,
    df_resid: usize,
    error_terms: Option<&[ErrorTerm]>,
) -> RrppResult<TermStatistics> {
    let n_terms = terms.len();
    if dist.ss.nrows() != n_terms {
        return Err(RrppError::BadInput(format!(
            "{} terms but distributions for {}",
            n_terms,
            dist.ss.nrows()
        )));
    }
    let error_terms: Vec<ErrorTerm> = match error_terms {
        None => vec![ErrorTerm::Residuals; n_terms],
        Some(e) if e.len() == n_terms => e.to_vec(),
        Some(e) => {
            return Err(RrppError::BadInput(format!(
                "{} error terms given for {} terms",
                e.len(),
                n_terms
            )))
        }
    };

    let df = Array1::from_iter(terms.iter().map(|t| t.df as f64));
    let ss = dist.ss.clone();
    // degenerate terms have zero df and an undefined mean square
    let ms = &ss / &df.view().insert_axis(Axis(1));
    let rsq = &ss / &dist.tss.view().insert_axis(Axis(0));
    let cohen_f = rsq.mapv(|r| r / (1. - r));

    let ms_resid = dist.rss.mapv(|rss| rss / df_resid as f64);
    let mut f = Array2::zeros(ss.raw_dim());
    for (i, error) in error_terms.iter().enumerate() {
        let denominator: ArrayView1<f64> = match error {
            ErrorTerm::Residuals => ms_resid.row(i),
            ErrorTerm::Term(name) => {
                let k = terms.iter().position(|t| &t.name == name).ok_or_else(|| {
                    RrppError::BadInput(format!("unknown error term '{}'", name))
                })?;
                if k == i {
                    return Err(RrppError::BadInput(format!(
                        "term '{}' cannot be its own error term",
                        name
                    )));
                }
                ms.row(k)
            }
        };
        let f_row = if terms[i].degenerate {
            Array1::from_elem(ss.ncols(), f64::NAN)
        } else {
            &ms.row(i) / &denominator
        };
        f.row_mut(i).assign(&f_row);
    }

    Ok(TermStatistics {
        ss,
        ms,
        rsq,
        f,
        cohen_f,
    })
}

/// Assemble the ANOVA table. Effect sizes are standardized deviates of the
/// log statistic; p-values count permuted values at least as large as the
/// observed one, the observed included.
pub fn anova(
    terms: &[TermInfo],
    dist: &Distributions,
    df_resid: usize,
    df_total: usize,
    options: &AnovaOptions,
) -> RrppResult<AnovaTable> {
    let stats = term_statistics(terms, dist, df_resid, options.error_terms.as_deref())?;
    let effect = stats.of(options.effect_type);

    let rows = terms
        .iter()
        .enumerate()
        .map(|(i, info)| {
            let (z, log_scale, p) = if info.degenerate {
                (f64::NAN, false, f64::NAN)
            } else {
                let stat = effect.row(i);
                let (z, log_scale) = log_effect_size(stat);
                if !log_scale {
                    log::debug!("Term '{}': effect size on the raw scale", info.name);
                }
                (z, log_scale, p_value(stat))
            };
            AnovaRow {
                term: info.name.clone(),
                df: info.df,
                ss: stats.ss[[i, 0]],
                ms: stats.ms[[i, 0]],
                rsq: stats.rsq[[i, 0]],
                f: stats.f[[i, 0]],
                z,
                p,
                log_scale,
                degenerate: info.degenerate,
            }
        })
        .collect();

    Ok(AnovaTable {
        rows,
        df_resid,
        rss: dist.rss_model[0],
        df_total,
        tss: dist.tss[0],
        effect_type: options.effect_type,
        n_perm: dist.n_perm(),
    })
}

/// Observed length of a term's coefficients with its effect size and
/// p-value.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientRow {
    pub term: String,
    pub length: f64,
    pub z: f64,
    pub p: f64,
}

/// Test the Euclidean length of each term's coefficients against its
/// permutation distribution. Requires coefficient distributions.
pub fn coefficient_test(
    terms: &[TermInfo],
    dist: &Distributions,
) -> RrppResult<Vec<CoefficientRow>> {
    let lengths = dist.coefficient_lengths.as_ref().ok_or_else(|| {
        RrppError::BadInput("coefficients were not recorded for this analysis".to_string())
    })?;
    Ok(terms
        .iter()
        .zip(lengths.axis_iter(Axis(0)))
        .map(|(info, d)| {
            let (z, p) = if info.degenerate {
                (f64::NAN, f64::NAN)
            } else {
                (effect_size(d), p_value(d))
            };
            CoefficientRow {
                term: info.name.clone(),
                length: d[0],
                z,
                p,
            }
        })
        .collect())
}
