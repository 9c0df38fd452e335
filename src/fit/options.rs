//! Fit-specific configuration and fit builder
use super::{transform::CovarianceTransform, Fit};
use crate::error::{RrppError, RrppResult};
use ndarray::{ArrayView1, ArrayView2};
use std::sync::Arc;

/// What to do when a matrix that should be inverted is numerically singular.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InversePolicy {
    /// Report a `SingularCovariance` error.
    Strict,
    /// Use the Moore-Penrose inverse, dropping null directions.
    Generalized,
    /// Shrink toward a scaled identity by the given fraction in (0, 1] and
    /// invert the result.
    Regularized(f64),
}

impl Default for InversePolicy {
    fn default() -> Self {
        Self::Generalized
    }
}

/// Specifies the numerical options of a least-squares fit
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// A column is aliased when the part of it orthogonal to the preceding
    /// kept columns has a norm below this fraction of its own norm.
    pub rank_tol: f64,
    /// Fallback used for singular covariance matrices.
    pub inverse_policy: InversePolicy,
    /// Screen the transformed design for aliased columns. When off, every
    /// column is used as given.
    pub screen: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            // the same default as the aliasing tolerance of R's lm()
            rank_tol: 1e-7,
            inverse_policy: InversePolicy::default(),
            screen: true,
        }
    }
}

/// A builder struct for fit configuration
pub struct FitConfig<'a> {
    pub(crate) x: ArrayView2<'a, f64>,
    pub(crate) y: ArrayView2<'a, f64>,
    pub(crate) covariance: Option<ArrayView2<'a, f64>>,
    pub(crate) weights: Option<ArrayView1<'a, f64>>,
    pub(crate) transform: Option<Arc<CovarianceTransform>>,
    pub(crate) offset: Option<ArrayView1<'a, f64>>,
    pub options: FitOptions,
}

impl<'a> FitConfig<'a> {
    pub(crate) fn new(x: ArrayView2<'a, f64>, y: ArrayView2<'a, f64>) -> Self {
        Self {
            x,
            y,
            covariance: None,
            weights: None,
            transform: None,
            offset: None,
            options: FitOptions::default(),
        }
    }

    /// Generalized least squares with the given residual covariance among
    /// observations. Takes precedence over weights.
    pub fn covariance(mut self, covariance: ArrayView2<'a, f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Weighted least squares. Ignored if a covariance is also supplied.
    pub fn weights(mut self, weights: ArrayView1<'a, f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Use a transform that has already been resolved, e.g. one shared by
    /// several nested models. Overrides covariance and weights.
    pub fn transform(mut self, transform: Arc<CovarianceTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// A known offset subtracted from every response column before fitting
    /// and added back to the fitted values.
    pub fn offset(mut self, offset: ArrayView1<'a, f64>) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the aliasing tolerance of the rank screen
    pub fn rank_tol(mut self, tol: f64) -> Self {
        self.options.rank_tol = tol;
        self
    }

    /// Whether to screen for aliased columns. Turn off for designs whose
    /// columns already passed a shared screen.
    pub fn screen(mut self, screen: bool) -> Self {
        self.options.screen = screen;
        self
    }

    /// Set the fallback used when the covariance is singular
    pub fn inverse_policy(mut self, policy: InversePolicy) -> Self {
        self.options.inverse_policy = policy;
        self
    }

    /// Resolve the transform once: an explicit transform first, then the
    /// covariance, then the weights.
    pub(crate) fn resolve_transform(&self) -> RrppResult<Arc<CovarianceTransform>> {
        if let Some(transform) = &self.transform {
            return Ok(Arc::clone(transform));
        }
        if let Some(cov) = self.covariance {
            if self.weights.is_some() {
                log::warn!("Both a covariance and weights were supplied; the weights are ignored");
            }
            let (transform, kind) =
                CovarianceTransform::from_covariance(cov, self.options.inverse_policy)?;
            if kind != crate::error::InverseKind::Exact {
                log::warn!("Singular covariance inverted with {:?} fallback", kind);
            }
            return Ok(Arc::new(transform));
        }
        if let Some(w) = self.weights {
            return Ok(Arc::new(CovarianceTransform::from_weights(w)?));
        }
        Ok(Arc::new(CovarianceTransform::Identity))
    }

    pub fn fit(self) -> RrppResult<Fit> {
        if self.options.rank_tol < 0. {
            return Err(RrppError::BadInput(
                "rank tolerance must be non-negative".to_string(),
            ));
        }
        let transform = self.resolve_transform()?;
        Fit::from_config(self.x, self.y, transform, self.offset, &self.options)
    }
}
