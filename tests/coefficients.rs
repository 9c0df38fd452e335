use anyhow::Result;

use approx::assert_abs_diff_eq;
use ndarray_rrpp::{Fit, ModelBuilder, Seed};
mod common;
use common::{balanced_labels, grouped_response, init_logger, one_factor_design};

#[test]
fn coefficient_lengths_test_group_shift() -> Result<()> {
    init_logger();
    let labels = balanced_labels(24, 2);
    let design = one_factor_design("group", &labels)?;
    let y = grouped_response(&labels, 2, 1.5, 3);
    let fit = ModelBuilder::data(y.view(), &design)
        .coefficients(true)
        .iterations(99)
        .seed(Seed::Fixed(5))
        .build()?
        .fit()?;

    let rows = fit.coefficient_test()?;
    assert_eq!(rows.len(), 1);
    // the observed length is the norm of the group contrast over both variables
    let direct = Fit::ols(design.x(), y.view())?;
    let contrast = direct.coefficients().row(1).to_owned();
    let norm = contrast.dot(&contrast).sqrt();
    assert_abs_diff_eq!(rows[0].length, norm, epsilon = 1e-9);
    assert!(rows[0].p < 0.05);

    let coefficients = fit
        .distributions()
        .coefficients
        .as_ref()
        .expect("coefficients recorded");
    assert_eq!(coefficients.len(), 100);
    assert_abs_diff_eq!(coefficients[0][0], *direct.coefficients(), epsilon = 1e-9);
    Ok(())
}

#[test]
fn coefficient_test_requires_recording() -> Result<()> {
    let labels = balanced_labels(12, 2);
    let design = one_factor_design("group", &labels)?;
    let y = grouped_response(&labels, 1, 1.0, 1);
    let fit = ModelBuilder::data(y.view(), &design)
        .iterations(9)
        .build()?
        .fit()?;
    assert!(fit.coefficient_test().is_err());
    assert!(fit.distributions().coefficients.is_none());
    Ok(())
}
