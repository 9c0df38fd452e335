//! struct holding the result of a least-squares fit

pub mod options;
pub mod projector;
pub mod transform;

use self::{
    options::{FitConfig, FitOptions},
    projector::Projector,
    transform::CovarianceTransform,
};
use crate::{
    design::independent_columns,
    error::{RrppError, RrppResult},
    utility::col_sum_sq,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::Arc;

/// The result of fitting a linear model to a response matrix. Fitted values
/// and residuals are on the original scale, while the projector works on the
/// transformed (whitened or weighted) scale so it can be reused for pseudo
/// responses built from transformed residuals.
#[derive(Debug, Clone)]
pub struct Fit {
    transform: Arc<CovarianceTransform>,
    projector: Projector,
    /// Columns of the supplied design that were used.
    kept: Vec<usize>,
    /// Number of columns of the supplied design.
    n_cols: usize,
    /// Least-squares coefficients for the kept columns, k x p.
    coefficients: Array2<f64>,
    fitted: Array2<f64>,
    residuals: Array2<f64>,
    /// Offset-adjusted, transformed fitted values and residuals.
    fitted_t: Array2<f64>,
    residuals_t: Array2<f64>,
}

impl Fit {
    /// Start configuring a fit of the response `y` (observations in rows,
    /// variables in columns) against the design `x`.
    pub fn config<'a>(x: ArrayView2<'a, f64>, y: ArrayView2<'a, f64>) -> FitConfig<'a> {
        FitConfig::new(x, y)
    }

    /// Ordinary least squares with default options.
    pub fn ols(x: ArrayView2<f64>, y: ArrayView2<f64>) -> RrppResult<Self> {
        Self::config(x.view(), y.view()).fit()
    }

    pub(crate) fn from_config(
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        transform: Arc<CovarianceTransform>,
        offset: Option<ArrayView1<f64>>,
        options: &FitOptions,
    ) -> RrppResult<Self> {
        let n_data = y.nrows();
        if n_data != x.nrows() {
            return Err(RrppError::BadInput(
                "y and x data must have same number of points".to_string(),
            ));
        }
        if let Some(dim) = transform.dim() {
            if dim != n_data {
                return Err(RrppError::BadInput(format!(
                    "transform is for {} observations but the data have {}",
                    dim, n_data
                )));
            }
        }
        let y_adj = subtract_offset(y, offset)?;
        let x_t = transform.apply(x);
        let y_t = transform.apply(y_adj.view());

        let kept = if options.screen {
            independent_columns(x_t.view(), options.rank_tol)?
        } else {
            (0..x.ncols()).collect()
        };
        if kept.is_empty() {
            return Err(RrppError::RankDeficiency {
                model: format!("{}-column design", x.ncols()),
            });
        }
        if kept.len() < x.ncols() {
            log::debug!("Fit dropped {} aliased column(s)", x.ncols() - kept.len());
        }
        let projector = Projector::new(x_t.select(Axis(1), &kept).view())?;
        let coefficients = projector.hat()?.dot(&y_t);
        let fitted_t = projector.fitted(y_t.view());
        let residuals_t = &y_t - &fitted_t;

        let residuals = transform.invert(residuals_t.view());
        let fitted = &y - &residuals;

        Ok(Self {
            transform,
            projector,
            kept,
            n_cols: x.ncols(),
            coefficients,
            fitted,
            residuals,
            fitted_t,
            residuals_t,
        })
    }

    /// The fit of a model without any columns: every fitted value is the
    /// offset and the residuals are the responses.
    pub fn empty(
        y: ArrayView2<f64>,
        transform: Arc<CovarianceTransform>,
        offset: Option<ArrayView1<f64>>,
    ) -> RrppResult<Self> {
        let y_adj = subtract_offset(y, offset)?;
        let residuals_t = transform.apply(y_adj.view());
        let fitted = &y - &y_adj;
        Ok(Self {
            transform,
            projector: Projector::empty(y.nrows()),
            kept: Vec::new(),
            n_cols: 0,
            coefficients: Array2::zeros((0, y.ncols())),
            fitted,
            residuals: y_adj,
            fitted_t: Array2::zeros(y.raw_dim()),
            residuals_t,
        })
    }

    /// Fitted values on the original scale, offset included.
    pub fn fitted(&self) -> &Array2<f64> {
        &self.fitted
    }

    /// Residuals on the original scale.
    pub fn residuals(&self) -> &Array2<f64> {
        &self.residuals
    }

    /// Fitted values on the transformed scale, offset excluded.
    pub fn transformed_fitted(&self) -> &Array2<f64> {
        &self.fitted_t
    }

    /// Residuals on the transformed scale.
    pub fn transformed_residuals(&self) -> &Array2<f64> {
        &self.residuals_t
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn transform(&self) -> &Arc<CovarianceTransform> {
        &self.transform
    }

    /// The realized rank of the design.
    pub fn rank(&self) -> usize {
        self.projector.rank()
    }

    /// Columns of the supplied design that entered the fit.
    pub fn kept_columns(&self) -> &[usize] {
        &self.kept
    }

    /// Residual degrees of freedom.
    pub fn df_resid(&self) -> usize {
        self.residuals.nrows().saturating_sub(self.rank())
    }

    /// Coefficients of the kept columns, one column per response variable.
    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    /// Coefficients for every supplied column, with NaN rows for aliased
    /// columns.
    pub fn full_coefficients(&self) -> Array2<f64> {
        let mut full = Array2::from_elem((self.n_cols, self.coefficients.ncols()), f64::NAN);
        for (row, &col) in self.kept.iter().enumerate() {
            full.row_mut(col).assign(&self.coefficients.row(row));
        }
        full
    }

    /// Residual sum of squares of each response variable, on the transformed
    /// scale the model was estimated on.
    pub fn rss(&self) -> Array1<f64> {
        col_sum_sq(self.residuals_t.view())
    }

    /// Predictions for new design rows laid out like the fitted design. The
    /// offset is not included.
    pub fn predict(&self, new_x: ArrayView2<f64>) -> RrppResult<Array2<f64>> {
        if new_x.ncols() != self.n_cols {
            return Err(RrppError::BadInput(format!(
                "new design has {} columns, the fit used {}",
                new_x.ncols(),
                self.n_cols
            )));
        }
        Ok(new_x.select(Axis(1), &self.kept).dot(&self.coefficients))
    }
}

fn subtract_offset(y: ArrayView2<f64>, offset: Option<ArrayView1<f64>>) -> RrppResult<Array2<f64>> {
    match offset {
        None => Ok(y.to_owned()),
        Some(off) => {
            if off.len() != y.nrows() {
                return Err(RrppError::BadInput(
                    "Offsets must have same dimension as observations".to_string(),
                ));
            }
            Ok(&y - &off.insert_axis(Axis(1)))
        }
    }
}
