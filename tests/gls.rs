use anyhow::Result;

use approx::assert_abs_diff_eq;
use ndarray::{concatenate, Array1, Array2, Axis};
use ndarray_rrpp::{
    AnovaOptions, DesignMatrix, InverseKind, InversePolicy, ModelBuilder, RrppError, RrppFit,
    RrppWarning, Seed, Term,
};
use ndarray_rrpp::model::ModelBuilderData;
mod common;
use common::{balanced_labels, covariate, dummy_code, init_logger, noise};

const N: usize = 18;

fn design() -> Result<DesignMatrix> {
    Ok(DesignMatrix::from_blocks(
        true,
        vec![
            (Term::new("group"), dummy_code(&balanced_labels(N, 3))),
            (Term::new("size"), covariate(N, 4)),
        ],
    )?)
}

fn response(design: &DesignMatrix) -> Array2<f64> {
    let signal = design.x().column(1).to_owned() * 0.8 + &(design.x().column(3).to_owned() * 0.1);
    noise(N, 1, 21) + &signal.insert_axis(Axis(1))
}

fn run<'a>(
    design: &'a DesignMatrix,
    y: &'a Array2<f64>,
    setup: impl FnOnce(ModelBuilderData<'a>) -> ModelBuilderData<'a>,
) -> Result<RrppFit> {
    let builder = ModelBuilder::data(y.view(), design)
        .iterations(99)
        .seed(Seed::Fixed(17));
    Ok(setup(builder).build()?.fit()?)
}

#[test]
fn identity_covariance_is_ols() -> Result<()> {
    init_logger();
    let design = design()?;
    let y = response(&design);
    let identity = Array2::<f64>::eye(N);
    let ols = run(&design, &y, |b| b)?;
    let gls = run(&design, &y, |b| b.covariance(identity.view()))?;
    assert_abs_diff_eq!(ols.distributions().ss, gls.distributions().ss, epsilon = 1e-9);
    assert_abs_diff_eq!(ols.distributions().rss, gls.distributions().rss, epsilon = 1e-9);
    let (a, b) = (
        ols.anova(&AnovaOptions::default())?,
        gls.anova(&AnovaOptions::default())?,
    );
    for (r_ols, r_gls) in a.rows.iter().zip(&b.rows) {
        assert_abs_diff_eq!(r_ols.p, r_gls.p);
    }
    assert!(gls.warnings().is_empty());
    Ok(())
}

#[test]
fn diagonal_covariance_matches_weights() -> Result<()> {
    let design = design()?;
    let y = response(&design);
    let variances = Array1::from_shape_fn(N, |i| 0.5 + (i % 4) as f64);
    let weights = variances.mapv(|v| 1. / v);
    let cov = Array2::from_diag(&variances);
    let weighted = run(&design, &y, |b| b.weights(weights.view()))?;
    let gls = run(&design, &y, |b| b.covariance(cov.view()))?;
    assert_abs_diff_eq!(weighted.distributions().ss, gls.distributions().ss, epsilon = 1e-8);
    // residuals are reported on the original scale
    let resid = gls.complete().residuals();
    let fitted = gls.complete().fitted();
    assert_abs_diff_eq!(&(resid + fitted), &y, epsilon = 1e-10);
    Ok(())
}

#[test]
fn singular_covariance_policy() -> Result<()> {
    let design = design()?;
    let y = response(&design);
    // the last observation is perfectly correlated with the first
    let mut cov = Array2::<f64>::eye(N);
    cov[[0, N - 1]] = 1.;
    cov[[N - 1, 0]] = 1.;
    cov[[N - 1, N - 1]] = 1.;

    let strict = ModelBuilder::data(y.view(), &design)
        .covariance(cov.view())
        .inverse_policy(InversePolicy::Strict)
        .build();
    assert!(matches!(strict, Err(RrppError::SingularCovariance(_))));

    let recovered = run(&design, &y, |b| b.covariance(cov.view()))?;
    assert!(recovered.warnings().contains(&RrppWarning::SingularCovarianceRecovered {
        how: InverseKind::Generalized
    }));
    assert!(recovered.distributions().ss.iter().all(|v| v.is_finite()));

    let shrunk = run(&design, &y, |b| {
        b.covariance(cov.view())
            .inverse_policy(InversePolicy::Regularized(0.1))
    })?;
    assert!(shrunk.warnings().contains(&RrppWarning::SingularCovarianceRecovered {
        how: InverseKind::Regularized
    }));
    Ok(())
}

#[test]
fn offset_is_subtracted_before_fitting() -> Result<()> {
    let design = design()?;
    let y = response(&design);
    let offset = Array1::from_shape_fn(N, |i| (i as f64 * 0.7).sin());
    let shifted = &y - &offset.view().insert_axis(Axis(1));
    let with_offset = run(&design, &y, |b| b.offset(offset.view()))?;
    let manual = run(&design, &shifted, |b| b)?;
    assert_abs_diff_eq!(
        with_offset.distributions().ss,
        manual.distributions().ss,
        epsilon = 1e-9
    );
    // fitted values include the offset
    let diff = with_offset.complete().fitted() - manual.complete().fitted();
    for (row, &o) in diff.rows().into_iter().zip(offset.iter()) {
        assert_abs_diff_eq!(row[0], o, epsilon = 1e-9);
    }
    Ok(())
}

#[test]
fn rank_screen_uses_whitened_design() -> Result<()> {
    // alternating signs are orthogonal to the intercept and carry no variance
    let u = Array1::from_shape_fn(N, |i| if i % 2 == 0 { 1. } else { -1. });
    let u_col = u.view().insert_axis(Axis(1));
    let cov = Array2::<f64>::eye(N) - &(u_col.dot(&u_col.t()) / N as f64);
    // the second size column whitens to the intercept
    let shifted = u_col.mapv(|v| v + 1.);
    let size = concatenate(Axis(1), &[covariate(N, 4).view(), shifted.view()])?;
    let design = DesignMatrix::from_blocks(
        true,
        vec![
            (Term::new("group"), dummy_code(&balanced_labels(N, 3))),
            (Term::new("size"), size),
        ],
    )?;
    let y = noise(N, 1, 21);
    let fit = run(&design, &y, |b| {
        b.covariance(cov.view())
            .inverse_policy(InversePolicy::Generalized)
    })?;

    assert!(fit.warnings().iter().any(|w| matches!(
        w,
        RrppWarning::RankTruncated { dropped_columns, .. } if dropped_columns == &vec![4]
    )));
    let decomposition = &fit.model().decomposition;
    assert_eq!(decomposition.kept_columns, vec![0, 1, 2, 3]);
    // every nested fit uses the shared column choice
    assert_eq!(fit.engine().complete().rank(), 4);
    for (term, pair) in fit.engine().terms().iter().zip(&decomposition.pairs) {
        assert_eq!(term.full().kept_columns().len(), pair.full().ncols());
        assert_eq!(term.reduced().kept_columns().len(), pair.reduced().ncols());
    }
    let table = fit.anova(&AnovaOptions::default())?;
    assert_eq!(table.rows[1].df, 1);
    assert_eq!(table.df_resid, N - 4);
    Ok(())
}
