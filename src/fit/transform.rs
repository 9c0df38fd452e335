//! Linear transforms that turn weighted and generalized least squares into
//! ordinary least squares on transformed data.

use super::options::InversePolicy;
use crate::error::{InverseKind, RrppError, RrppResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};

/// The premultiplying transform applied to both the design and the response.
/// Resolved once when a fit is configured.
#[derive(Debug, Clone, PartialEq)]
pub enum CovarianceTransform {
    /// Ordinary least squares.
    Identity,
    /// Rows scaled by the square roots of the weights.
    Weights { sqrt_w: Array1<f64> },
    /// Whitening by the inverse symmetric square root of a covariance, along
    /// with the symmetric square root that undoes it.
    Covariance {
        whiten: Array2<f64>,
        unwhiten: Array2<f64>,
    },
}

impl CovarianceTransform {
    /// Weights must be positive and finite.
    pub fn from_weights(weights: ArrayView1<f64>) -> RrppResult<Self> {
        if weights.iter().any(|&w| !(w > 0.) || !w.is_finite()) {
            return Err(RrppError::BadInput(
                "weights must be positive and finite".to_string(),
            ));
        }
        Ok(Self::Weights {
            sqrt_w: weights.mapv(f64::sqrt),
        })
    }

    /// Build the whitening transform `C^{-1/2}` from the eigendecomposition of
    /// a symmetric covariance `C`. Returns the kind of inverse that was
    /// needed.
    pub fn from_covariance(
        cov: ArrayView2<f64>,
        policy: InversePolicy,
    ) -> RrppResult<(Self, InverseKind)> {
        let n = cov.nrows();
        if n != cov.ncols() {
            return Err(RrppError::BadInput(format!(
                "covariance must be square, got {}x{}",
                n,
                cov.ncols()
            )));
        }
        let scale = cov.iter().fold(0., |acc: f64, v| acc.max(v.abs()));
        if cov
            .indexed_iter()
            .any(|((i, j), &v)| (v - cov[[j, i]]).abs() > 1e-10 * scale.max(1.))
        {
            return Err(RrppError::BadInput(
                "covariance must be symmetric".to_string(),
            ));
        }

        let (vals, vecs) = cov.eigh(UPLO::Lower)?;
        let cutoff = eigen_cutoff(&vals);
        if vals.iter().all(|&l| l > cutoff) {
            return Ok((Self::from_eigen(&vals, &vecs, cutoff), InverseKind::Exact));
        }
        match policy {
            InversePolicy::Strict => Err(RrppError::SingularCovariance(
                "covariance is not positive definite".to_string(),
            )),
            InversePolicy::Generalized => Ok((
                Self::from_eigen(&vals, &vecs, cutoff),
                InverseKind::Generalized,
            )),
            InversePolicy::Regularized(lambda) => {
                let target = (cov.diag().sum() / n as f64).max(f64::MIN_POSITIVE);
                let mut shrunk = cov.mapv(|v| (1. - lambda) * v);
                shrunk.diag_mut().mapv_inplace(|d| d + lambda * target);
                let (vals, vecs) = shrunk.eigh(UPLO::Lower)?;
                let cutoff = eigen_cutoff(&vals);
                if vals.iter().any(|&l| l <= cutoff) {
                    return Err(RrppError::SingularCovariance(format!(
                        "covariance still singular after shrinkage {}",
                        lambda
                    )));
                }
                Ok((
                    Self::from_eigen(&vals, &vecs, cutoff),
                    InverseKind::Regularized,
                ))
            }
        }
    }

    /// Eigenvalues at or below the cutoff are treated as zero in both
    /// directions.
    fn from_eigen(vals: &Array1<f64>, vecs: &Array2<f64>, cutoff: f64) -> Self {
        let inv_sqrt = vals.mapv(|l| if l > cutoff { 1. / l.sqrt() } else { 0. });
        let sqrt = vals.mapv(|l| if l > cutoff { l.sqrt() } else { 0. });
        let whiten = (vecs * &inv_sqrt).dot(&vecs.t());
        let unwhiten = (vecs * &sqrt).dot(&vecs.t());
        Self::Covariance { whiten, unwhiten }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// The number of observations the transform applies to, if fixed.
    pub fn dim(&self) -> Option<usize> {
        match self {
            Self::Identity => None,
            Self::Weights { sqrt_w } => Some(sqrt_w.len()),
            Self::Covariance { whiten, .. } => Some(whiten.nrows()),
        }
    }

    /// Premultiply by the transform.
    pub fn apply(&self, a: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Self::Identity => a.to_owned(),
            Self::Weights { sqrt_w } => &a * &sqrt_w.view().insert_axis(Axis(1)),
            Self::Covariance { whiten, .. } => whiten.dot(&a),
        }
    }

    /// Premultiply by the inverse of the transform, mapping transformed
    /// quantities back to the original scale.
    pub fn invert(&self, a: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Self::Identity => a.to_owned(),
            Self::Weights { sqrt_w } => &a / &sqrt_w.view().insert_axis(Axis(1)),
            Self::Covariance { unwhiten, .. } => unwhiten.dot(&a),
        }
    }
}

fn eigen_cutoff(vals: &Array1<f64>) -> f64 {
    let max = vals.fold(0., |acc: f64, &l| acc.max(l.abs()));
    max * vals.len() as f64 * f64::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn whitening_inverts_covariance() -> RrppResult<()> {
        let cov = array![[2., 0.5, 0.], [0.5, 1., 0.2], [0., 0.2, 1.5]];
        let (t, kind) = CovarianceTransform::from_covariance(cov.view(), InversePolicy::Strict)?;
        assert_eq!(kind, InverseKind::Exact);
        // T C T^T = I
        let tct = t.apply(t.apply(cov.view()).t());
        assert_abs_diff_eq!(tct, Array2::eye(3), epsilon = 1e-10);
        let round = t.invert(t.apply(cov.view()).view());
        assert_abs_diff_eq!(round, cov, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn singular_covariance_policies() -> RrppResult<()> {
        let cov = array![[1., 1.], [1., 1.]];
        assert!(CovarianceTransform::from_covariance(cov.view(), InversePolicy::Strict).is_err());
        let (_, kind) =
            CovarianceTransform::from_covariance(cov.view(), InversePolicy::Generalized)?;
        assert_eq!(kind, InverseKind::Generalized);
        let (_, kind) =
            CovarianceTransform::from_covariance(cov.view(), InversePolicy::Regularized(0.2))?;
        assert_eq!(kind, InverseKind::Regularized);
        Ok(())
    }

    #[test]
    fn weights_scale_rows() -> RrppResult<()> {
        let t = CovarianceTransform::from_weights(array![4., 1.].view())?;
        let a = array![[1., 2.], [3., 4.]];
        assert_eq!(t.apply(a.view()), array![[2., 4.], [3., 4.]]);
        assert_eq!(t.invert(t.apply(a.view()).view()), a);
        assert!(CovarianceTransform::from_weights(array![1., 0.].view()).is_err());
        Ok(())
    }
}
