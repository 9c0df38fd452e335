//! Compare competing models fit to the same response with the same
//! permutation schedule. Only stored distributions are used; nothing is
//! refit.

use crate::{
    error::{RrppError, RrppResult},
    math::{effect_size, p_value},
    model::RrppFit,
};
use ndarray::Array1;

/// A model's fit relative to the reference model.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    /// Position in the comparison, 0 for the reference.
    pub model: usize,
    pub df_resid: usize,
    pub rss: f64,
    /// Parameters gained over the reference. Negative for smaller models.
    pub df: i64,
    /// Reduction of the residual sum of squares relative to the reference.
    pub ss: f64,
    pub rsq: f64,
    pub f: f64,
    pub z: f64,
    pub p: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelComparison {
    pub rows: Vec<ComparisonRow>,
    pub tss: f64,
    pub n_perm: usize,
}

/// Compare each model against the reference. Every model must share the
/// reference's response, schedule, covariance and null model, so the total
/// sum of squares is common. The F statistic is tested when the model has
/// more parameters than the reference and the sum of squares otherwise;
/// effect sizes are computed on the raw statistic since differences may be
/// negative.
pub fn compare_models(reference: &RrppFit, others: &[&RrppFit]) -> RrppResult<ModelComparison> {
    for (i, other) in others.iter().enumerate() {
        check_compatible(reference, other, i + 1)?;
    }
    let ref_rss = &reference.distributions().rss_model;
    let tss = &reference.distributions().tss;
    let ref_df = reference.df_resid();

    let mut rows = vec![ComparisonRow {
        model: 0,
        df_resid: ref_df,
        rss: ref_rss[0],
        df: 0,
        ss: f64::NAN,
        rsq: f64::NAN,
        f: f64::NAN,
        z: f64::NAN,
        p: f64::NAN,
    }];
    for (i, other) in others.iter().enumerate() {
        let rss = &other.distributions().rss_model;
        let df_resid = other.df_resid();
        let df = ref_df as i64 - df_resid as i64;
        let ss: Array1<f64> = ref_rss - rss;
        let rsq = &ss / tss;
        let f: Array1<f64> = if df > 0 {
            let ms_resid = rss.mapv(|r| r / df_resid as f64);
            ss.mapv(|s| s / df as f64) / ms_resid
        } else {
            Array1::from_elem(ss.len(), f64::NAN)
        };
        let stat = if df > 0 { &f } else { &ss };
        log::debug!(
            "Model {}: {} parameter(s) over the reference, SS {:.4}",
            i + 1,
            df,
            ss[0]
        );
        rows.push(ComparisonRow {
            model: i + 1,
            df_resid,
            rss: rss[0],
            df,
            ss: ss[0],
            rsq: rsq[0],
            f: f[0],
            z: effect_size(stat.view()),
            p: p_value(stat.view()),
        });
    }

    Ok(ModelComparison {
        rows,
        tss: tss[0],
        n_perm: tss.len(),
    })
}

fn check_compatible(reference: &RrppFit, other: &RrppFit, index: usize) -> RrppResult<()> {
    let (a, b) = (reference.model(), other.model());
    if a.y.dim() != b.y.dim() {
        return Err(RrppError::IncompatibleModels(format!(
            "model {} has response of shape {:?}, the reference {:?}",
            index,
            b.y.dim(),
            a.y.dim()
        )));
    }
    if a.y != b.y || a.offset != b.offset {
        return Err(RrppError::IncompatibleModels(format!(
            "model {} was fit to a different response",
            index
        )));
    }
    if a.schedule != b.schedule {
        return Err(RrppError::IncompatibleModels(format!(
            "model {} uses a different permutation schedule",
            index
        )));
    }
    if a.decomposition.null.x() != b.decomposition.null.x() {
        return Err(RrppError::IncompatibleModels(format!(
            "model {} has a different null model, so its total sum of squares differs",
            index
        )));
    }
    if a.transform != b.transform {
        return Err(RrppError::IncompatibleModels(format!(
            "model {} uses a different covariance structure",
            index
        )));
    }
    Ok(())
}
