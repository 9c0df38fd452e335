//! define the error enum for the result of permutation analyses, along with
//! the non-fatal warnings collected on the way.

use ndarray_linalg::error::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RrppError {
    #[error("Inconsistent input: {0}")]
    BadInput(String),
    /// Malformed or non-nested term structure. Raised before any permutation
    /// work is started.
    #[error("Invalid design: {0}")]
    Design(String),
    /// A model that must carry at least one column has none left after rank
    /// screening.
    #[error("Model '{model}' has rank zero")]
    RankDeficiency { model: String },
    /// A covariance or SSCP matrix could not be inverted and the inverse
    /// policy does not allow a fallback.
    #[error("Singular matrix: {0}")]
    SingularCovariance(String),
    #[error("Models cannot be compared: {0}")]
    IncompatibleModels(String),
    #[error("Linear algebra")]
    LinalgError {
        #[from]
        source: LinalgError,
    },
    #[error("Could not build thread pool")]
    ThreadPool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },
}

pub type RrppResult<T> = Result<T, RrppError>;

/// How a near-singular matrix was inverted after the exact inverse was
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseKind {
    /// The matrix was well-conditioned.
    Exact,
    /// Singular values below tolerance were dropped (Moore-Penrose inverse).
    Generalized,
    /// The matrix was shrunk toward a scaled identity before inversion.
    Regularized,
}

/// Conditions that do not stop an analysis but that callers should know
/// about.
#[derive(Debug, Clone, PartialEq)]
pub enum RrppWarning {
    /// The term's reduced and full models span the same space, so its sum of
    /// squares is zero under every permutation.
    DegenerateTerm { term: String },
    /// Linearly dependent design columns were dropped. Degrees of freedom
    /// follow the realized rank.
    RankTruncated {
        dropped_columns: Vec<usize>,
        terms: Vec<String>,
    },
    /// The supplied covariance was singular and was inverted by a fallback.
    SingularCovarianceRecovered { how: InverseKind },
}

impl std::fmt::Display for RrppWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateTerm { term } => {
                write!(f, "term '{}' adds no columns to its reduced model", term)
            }
            Self::RankTruncated {
                dropped_columns,
                terms,
            } => write!(
                f,
                "dropped {} aliased column(s) {:?} belonging to {:?}",
                dropped_columns.len(),
                dropped_columns,
                terms
            ),
            Self::SingularCovarianceRecovered { how } => {
                write!(f, "singular covariance inverted with {:?} fallback", how)
            }
        }
    }
}
