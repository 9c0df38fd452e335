//! utility functions for internal library use

use crate::{
    error::{InverseKind, RrppError, RrppResult},
    fit::options::InversePolicy,
};
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{Inverse, SVD};

/// Shrinkage used when the generalized inverse itself cannot be computed.
const FALLBACK_SHRINKAGE: f64 = 1e-4;

/// Prepend the input with a column of ones.
/// Used to incorporate a constant intercept term in a design matrix.
pub fn one_pad(data: ArrayView2<f64>) -> Array2<f64> {
    // create the ones column
    let ones: Array2<f64> = Array2::ones((data.nrows(), 1));
    // This should be guaranteed to succeed since we are manually specifying the dimension
    concatenate![Axis(1), ones, data]
}

/// Returns `a^T * a`.
pub fn crossprod(a: ArrayView2<f64>) -> Array2<f64> {
    a.t().dot(&a)
}

/// Sum of the squares of every element.
pub fn sum_sq(a: ArrayView2<f64>) -> f64 {
    a.fold(0., |acc, &v| acc + v * v)
}

/// Column-wise sums of squares.
pub fn col_sum_sq(a: ArrayView2<f64>) -> Array1<f64> {
    a.fold_axis(Axis(0), 0., |&acc, &v| acc + v * v)
}

/// Invert a square matrix, falling back according to the policy when it is
/// numerically singular. The exact inverse is attempted first, then the
/// Moore-Penrose inverse from the SVD, and finally shrinkage toward a scaled
/// identity.
pub fn robust_inverse(
    mat: ArrayView2<f64>,
    policy: InversePolicy,
) -> RrppResult<(Array2<f64>, InverseKind)> {
    let n = mat.nrows();
    if n != mat.ncols() {
        return Err(RrppError::BadInput(format!(
            "cannot invert a {}x{} matrix",
            n,
            mat.ncols()
        )));
    }
    if n == 0 {
        return Ok((Array2::zeros((0, 0)), InverseKind::Exact));
    }

    let svd = mat.svd(true, true);
    let (u, s, vt) = match svd {
        Ok((Some(u), s, Some(vt))) => (u, s, vt),
        // No usable decomposition. Only shrinkage is left.
        _ => {
            return match policy {
                InversePolicy::Strict => Err(RrppError::SingularCovariance(
                    "singular value decomposition failed".to_string(),
                )),
                InversePolicy::Generalized => shrunk_inverse(mat, FALLBACK_SHRINKAGE),
                InversePolicy::Regularized(lambda) => shrunk_inverse(mat, lambda),
            };
        }
    };
    let s_max = s.fold(0., |acc: f64, &v| acc.max(v));
    let cutoff = s_max * n as f64 * f64::EPSILON;
    if s_max > 0. && s.iter().all(|&v| v > cutoff) {
        if let Ok(inv) = mat.inv() {
            if inv.iter().all(|v| v.is_finite()) {
                return Ok((inv, InverseKind::Exact));
            }
        }
    }

    match policy {
        InversePolicy::Strict => Err(RrppError::SingularCovariance(format!(
            "smallest singular value below {:e}",
            cutoff
        ))),
        InversePolicy::Generalized => {
            // V * diag(1/s) * U^T over the retained singular values
            let s_inv: Array1<f64> = s.mapv(|v| if v > cutoff { 1. / v } else { 0. });
            let v_scaled = &vt.t() * &s_inv;
            Ok((v_scaled.dot(&u.t()), InverseKind::Generalized))
        }
        InversePolicy::Regularized(lambda) => shrunk_inverse(mat, lambda),
    }
}

/// Inverse of `(1 - lambda) * mat + lambda * (tr(mat) / n) * I`.
fn shrunk_inverse(mat: ArrayView2<f64>, lambda: f64) -> RrppResult<(Array2<f64>, InverseKind)> {
    let n = mat.nrows();
    let scale = mat.diag().sum() / n as f64;
    let target = if scale > 0. { scale } else { 1. };
    let mut shrunk: Array2<f64> = mat.mapv(|v| (1. - lambda) * v);
    shrunk
        .diag_mut()
        .mapv_inplace(|d| d + lambda * target);
    let inv = shrunk.inv()?;
    Ok((inv, InverseKind::Regularized))
}
