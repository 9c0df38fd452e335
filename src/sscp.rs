//! Multivariate extension: sums-of-squares-and-cross-products matrices per
//! term and permutation, the eigenvalues of `R^{-1} H`, and the classical
//! multivariate test statistics built from them.
//!
//! High-dimensional responses make the residual SSCP matrix singular, so the
//! response is first replaced by its leading principal component scores. This
//! is a modeling choice that changes the statistics relative to the raw
//! variables unless every component is retained.

use crate::{
    engine::TermInfo,
    error::{InverseKind, RrppError, RrppResult},
    fit::options::InversePolicy,
    math::{center_columns, log_effect_size, p_value},
    utility::robust_inverse,
};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{EigVals, SVD};
use std::fmt;

/// Eigenvalues at or below this fraction of `1 + max` are treated as zero.
const EIGEN_TOL: f64 = 1e-10;

/// SSCP matrices of one term under one permutation.
#[derive(Debug, Clone)]
pub struct SscpResult {
    /// Cross products of the difference between full and reduced fitted
    /// values.
    pub h: Array2<f64>,
    /// Cross products of the full-model residuals.
    pub r: Array2<f64>,
    /// Positive real parts of the eigenvalues of `R^{-1} H`, largest first.
    pub eigenvalues: Array1<f64>,
    /// How `R` was inverted, or `None` when the eigenvalues could not be
    /// computed and are reported as NaN.
    pub inverse: Option<InverseKind>,
}

/// Invert `r` and extract the eigenvalues of `R^{-1} H`. Numerical failures
/// are recorded on the result instead of being raised, so a single bad
/// permutation does not invalidate a distribution.
pub fn sscp_statistics(h: &Array2<f64>, r: &Array2<f64>, policy: InversePolicy) -> SscpResult {
    let failed = |h: &Array2<f64>, r: &Array2<f64>| SscpResult {
        h: h.clone(),
        r: r.clone(),
        eigenvalues: Array1::from_elem(1, f64::NAN),
        inverse: None,
    };
    let (r_inv, kind) = match robust_inverse(r.view(), policy) {
        Ok(inv) => inv,
        Err(err) => {
            log::warn!("Residual SSCP could not be inverted: {}", err);
            return failed(h, r);
        }
    };
    if kind != InverseKind::Exact {
        log::debug!("Residual SSCP inverted with {:?} fallback", kind);
    }
    let product = r_inv.dot(h);
    let eigenvalues = match product.eigvals() {
        Ok(vals) => positive_real_parts(vals.iter().map(|c| c.re)),
        Err(err) => {
            log::warn!("Eigenvalues of the SSCP product failed: {}", err);
            return failed(h, r);
        }
    };
    SscpResult {
        h: h.clone(),
        r: r.clone(),
        eigenvalues,
        inverse: Some(kind),
    }
}

fn positive_real_parts<I: Iterator<Item = f64>>(vals: I) -> Array1<f64> {
    let mut vals: Vec<f64> = vals.collect();
    let max = vals.iter().fold(0., |acc: f64, &v| acc.max(v));
    let cutoff = EIGEN_TOL * (1. + max);
    vals.retain(|&v| v > cutoff);
    vals.sort_by(|a, b| b.total_cmp(a));
    Array1::from(vals)
}

/// Test statistics computed from the positive eigenvalues of `R^{-1} H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultivariateStat {
    /// Roy's largest root.
    Roy,
    /// Pillai's trace, the sum of `l / (1 + l)`.
    Pillai,
    /// Hotelling-Lawley trace, the sum of the eigenvalues.
    HotellingLawley,
    /// Wilks' lambda, the product of `1 / (1 + l)`. Small values are
    /// extreme.
    Wilks,
}

impl fmt::Display for MultivariateStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Roy => "Roy",
            Self::Pillai => "Pillai",
            Self::HotellingLawley => "Hotelling-Lawley",
            Self::Wilks => "Wilks",
        };
        write!(f, "{}", label)
    }
}

impl MultivariateStat {
    pub fn compute(&self, eigenvalues: &Array1<f64>) -> f64 {
        if eigenvalues.iter().any(|v| v.is_nan()) {
            return f64::NAN;
        }
        match self {
            Self::Roy => eigenvalues.iter().fold(0., |acc: f64, &l| acc.max(l)),
            Self::Pillai => eigenvalues.iter().map(|&l| l / (1. + l)).sum(),
            Self::HotellingLawley => eigenvalues.sum(),
            Self::Wilks => eigenvalues.iter().map(|&l| 1. / (1. + l)).product(),
        }
    }

    /// The statistic mapped so that large values are extreme.
    fn upper_tail(&self, stat: f64) -> f64 {
        match self {
            Self::Wilks => 1. / stat,
            _ => stat,
        }
    }
}

/// How many principal components of the response to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PcaRetention {
    /// Keep components whose standard deviation exceeds this fraction of the
    /// first component's.
    Tolerance(f64),
    /// Keep a fixed number of components.
    Count(usize),
}

impl Default for PcaRetention {
    fn default() -> Self {
        Self::Tolerance(1e-7)
    }
}

/// Principal component scores of a response matrix.
#[derive(Debug, Clone)]
pub struct PrincipalComponents {
    /// Scores of the retained components, n x k.
    pub scores: Array2<f64>,
    /// Standard deviations of every component, retained or not.
    pub sdev: Array1<f64>,
    /// Loadings of the retained components, p x k.
    pub rotation: Array2<f64>,
}

impl PrincipalComponents {
    /// Center the columns of `y` and project onto the leading right singular
    /// vectors. At most `max_components` are kept.
    pub fn new(
        y: ArrayView2<f64>,
        retention: PcaRetention,
        max_components: usize,
    ) -> RrppResult<Self> {
        let n = y.nrows();
        if n < 2 {
            return Err(RrppError::BadInput(
                "principal components need at least two observations".to_string(),
            ));
        }
        let centered = center_columns(&y.to_owned());
        let (_, s, vt) = centered.svd(false, true)?;
        let vt = vt.ok_or_else(|| {
            RrppError::BadInput("singular value decomposition returned no vectors".to_string())
        })?;
        let sdev = s.mapv(|v| v / ((n - 1) as f64).sqrt());
        let available = sdev.len().min(vt.nrows());
        let k = match retention {
            PcaRetention::Tolerance(tol) => {
                let first = sdev.first().copied().unwrap_or(0.);
                sdev.iter().take(available).filter(|&&d| d > tol * first).count()
            }
            PcaRetention::Count(count) => count.min(available),
        };
        let k = k.min(max_components);
        if k == 0 {
            return Err(RrppError::Design(
                "no principal components retained for the SSCP analysis".to_string(),
            ));
        }
        let rotation = vt.slice(s![0..k, ..]).t().to_owned();
        let scores = centered.dot(&rotation);
        Ok(Self {
            scores,
            sdev,
            rotation,
        })
    }

    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }
}

/// SSCP results for every permutation of an analysis.
#[derive(Debug, Clone)]
pub struct ManovaResult {
    pub terms: Vec<TermInfo>,
    pub pca: PrincipalComponents,
    /// Indexed by permutation, then term.
    pub sscp: Vec<Vec<SscpResult>>,
    pub df_resid: usize,
}

/// One row of a MANOVA table.
#[derive(Debug, Clone, PartialEq)]
pub struct ManovaRow {
    pub term: String,
    pub df: usize,
    /// Observed value of the statistic.
    pub stat: f64,
    pub z: f64,
    pub p: f64,
    /// `z` is on the log scale. False when some permutation has no positive
    /// eigenvalue.
    pub log_scale: bool,
    pub degenerate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManovaTable {
    pub statistic: MultivariateStat,
    pub rows: Vec<ManovaRow>,
    pub df_resid: usize,
    pub n_components: usize,
    pub n_perm: usize,
}

impl ManovaResult {
    /// The permutation distribution of a statistic, terms x permutations.
    pub fn distribution(&self, stat: MultivariateStat) -> Array2<f64> {
        let n_terms = self.terms.len();
        let n_perm = self.sscp.len();
        Array2::from_shape_fn((n_terms, n_perm), |(i, j)| {
            stat.compute(&self.sscp[j][i].eigenvalues)
        })
    }

    /// Summarize the observed statistic of every term with its effect size
    /// and p-value. Wilks' lambda is tested in the lower tail through its
    /// reciprocal.
    pub fn table(&self, stat: MultivariateStat) -> ManovaTable {
        let dist = self.distribution(stat);
        let rows = self
            .terms
            .iter()
            .zip(dist.axis_iter(Axis(0)))
            .map(|(info, row)| {
                let tail = row.mapv(|v| stat.upper_tail(v));
                let (z, log_scale, p) = if info.degenerate {
                    (f64::NAN, false, f64::NAN)
                } else {
                    let (z, log_scale) = log_effect_size(tail.view());
                    (z, log_scale, p_value(tail.view()))
                };
                ManovaRow {
                    term: info.name.clone(),
                    df: info.df,
                    stat: row[0],
                    z,
                    p,
                    log_scale,
                    degenerate: info.degenerate,
                }
            })
            .collect();
        ManovaTable {
            statistic: stat,
            rows,
            df_resid: self.df_resid,
            n_components: self.pca.n_components(),
            n_perm: self.sscp.len(),
        }
    }

    /// Permutations at which `R` needed a fallback inverse or failed.
    pub fn recovered_permutations(&self) -> Vec<usize> {
        self.sscp
            .iter()
            .enumerate()
            .filter(|(_, terms)| {
                terms
                    .iter()
                    .any(|t| t.inverse != Some(InverseKind::Exact))
            })
            .map(|(j, _)| j)
            .collect()
    }
}
