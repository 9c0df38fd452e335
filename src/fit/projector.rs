//! Orthogonal projection onto the column space of a design.

use crate::{error::RrppResult, utility::sum_sq};
use ndarray::{Array2, ArrayView2};
use ndarray_linalg::{Diag, SolveTriangular, QR, UPLO};

/// The thin QR factors of a design with linearly independent columns. Maps
/// any response matrix to its least-squares fit without solving a new system.
#[derive(Debug, Clone)]
pub struct Projector {
    /// Orthonormal basis of the column space, n x k.
    q: Array2<f64>,
    /// Upper triangular factor, k x k.
    r: Array2<f64>,
}

impl Projector {
    /// Factor a design. The columns are assumed to be linearly independent;
    /// run a rank screen first otherwise. A design without columns gives the
    /// zero projector.
    pub fn new(x: ArrayView2<f64>) -> RrppResult<Self> {
        if x.ncols() == 0 {
            return Ok(Self::empty(x.nrows()));
        }
        let (q, r) = x.qr()?;
        Ok(Self { q, r })
    }

    /// The projector onto the trivial subspace.
    pub fn empty(n_rows: usize) -> Self {
        Self {
            q: Array2::zeros((n_rows, 0)),
            r: Array2::zeros((0, 0)),
        }
    }

    /// The dimension of the column space.
    pub fn rank(&self) -> usize {
        self.q.ncols()
    }

    pub fn nrows(&self) -> usize {
        self.q.nrows()
    }

    /// The orthonormal basis.
    pub fn basis(&self) -> ArrayView2<f64> {
        self.q.view()
    }

    /// Coordinates of the projection in the orthonormal basis, `Q^T y`.
    pub fn coordinates(&self, y: ArrayView2<f64>) -> Array2<f64> {
        if self.rank() == 0 {
            return Array2::zeros((0, y.ncols()));
        }
        self.q.t().dot(&y)
    }

    /// Fitted values `Q Q^T y`.
    pub fn fitted(&self, y: ArrayView2<f64>) -> Array2<f64> {
        if self.rank() == 0 {
            return Array2::zeros(y.raw_dim());
        }
        self.q.dot(&self.coordinates(y))
    }

    /// Residuals `y - Q Q^T y`.
    pub fn residuals(&self, y: ArrayView2<f64>) -> Array2<f64> {
        &y - &self.fitted(y)
    }

    /// The sum of squares of the fitted values over every response column.
    /// Since Q is orthonormal this is the squared norm of the coordinates.
    pub fn explained_ss(&self, y: ArrayView2<f64>) -> f64 {
        sum_sq(self.coordinates(y).view())
    }

    /// The operator `R^{-1} Q^T` taking a response to its least-squares
    /// coefficients, k x n.
    pub fn hat(&self) -> RrppResult<Array2<f64>> {
        if self.rank() == 0 {
            return Ok(Array2::zeros((0, self.nrows())));
        }
        let qt = self.q.t().to_owned();
        Ok(self.r.solve_triangular(UPLO::Upper, Diag::NonUnit, &qt)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn projection_is_idempotent() -> RrppResult<()> {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.]];
        let y = array![[1.], [3.], [2.], [5.]];
        let p = Projector::new(x.view())?;
        assert_eq!(p.rank(), 2);
        let fitted = p.fitted(y.view());
        assert_abs_diff_eq!(p.fitted(fitted.view()), fitted, epsilon = 1e-12);
        // residuals are orthogonal to the design
        let res = p.residuals(y.view());
        assert_abs_diff_eq!(x.t().dot(&res), Array2::zeros((2, 1)), epsilon = 1e-12);
        assert_abs_diff_eq!(
            p.explained_ss(y.view()),
            sum_sq(fitted.view()),
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn hat_recovers_coefficients() -> RrppResult<()> {
        let x = array![[1., 0.], [1., 1.], [1., 2.]];
        // exactly y = 2 + 3 x
        let y = array![[2.], [5.], [8.]];
        let beta = Projector::new(x.view())?.hat()?.dot(&y);
        assert_abs_diff_eq!(beta, array![[2.], [3.]], epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn empty_projector() {
        let p = Projector::empty(3);
        let y = array![[1.], [2.], [3.]];
        assert_eq!(p.explained_ss(y.view()), 0.);
        assert_eq!(p.fitted(y.view()), Array2::zeros((3, 1)));
    }
}
