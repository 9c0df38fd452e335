//! Permutation tests for the terms of linear models by randomization of
//! residuals in a permutation procedure (RRPP).
//!
//! A multi-term design is decomposed into nested (reduced, full) model pairs
//! according to a sums-of-squares convention. Each pair is fit once to the
//! observed response; every permutation then adds reordered reduced-model
//! residuals to the reduced-model fitted values and projects the resulting
//! pseudo response through the cached projectors. The distributions of sums
//! of squares, F ratios and, for multivariate responses, SSCP eigenvalue
//! statistics give effect sizes and p-values without parametric assumptions.
//!
//! ```no_run
//! use ndarray::array;
//! use ndarray_rrpp::{AnovaOptions, DesignMatrix, ModelBuilder, Seed, Term};
//!
//! # fn main() -> ndarray_rrpp::RrppResult<()> {
//! let group = array![[0.], [0.], [0.], [1.], [1.], [1.]];
//! let design = DesignMatrix::from_blocks(true, vec![(Term::new("group"), group)])?;
//! let y = array![1.0, 1.3, 0.8, 2.2, 2.5, 2.1];
//! let fit = ModelBuilder::data_1d(y.view(), &design)
//!     .iterations(999)
//!     .seed(Seed::Fixed(1))
//!     .build()?
//!     .fit()?;
//! let table = fit.anova(&AnovaOptions::default())?;
//! println!("{:?}", table.row("group"));
//! # Ok(())
//! # }
//! ```

pub mod compare;
pub mod decompose;
pub mod design;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fit;
mod math;
pub mod model;
pub mod permutation;
pub mod sscp;
pub mod stats;
mod utility;

pub use compare::{compare_models, ComparisonRow, ModelComparison};
pub use decompose::{
    containment_matrix, decompose, decompose_transformed, Decomposition, NestedModelPair, SsType,
};
pub use design::{DesignMatrix, Term, INTERCEPT};
pub use engine::{
    Distributions, EngineOptions, PermutationResult, Randomization, RrppEngine, TermInfo,
};
pub use error::{InverseKind, RrppError, RrppResult, RrppWarning};
pub use executor::{Executor, Parallel, Sequential};
pub use fit::{
    options::{FitOptions, InversePolicy},
    transform::CovarianceTransform,
    Fit,
};
pub use math::{effect_size, p_value};
pub use model::{Model, ModelBuilder, RrppFit};
pub use permutation::{block_labels, schedule, PermutationSchedule, Seed};
pub use sscp::{ManovaResult, ManovaTable, MultivariateStat, PcaRetention, PrincipalComponents};
pub use stats::{AnovaOptions, AnovaRow, AnovaTable, CoefficientRow, EffectType, ErrorTerm};
