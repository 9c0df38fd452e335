//! Mathematical helper functions for permutation distributions.
use ndarray::{Array2, ArrayView1, Axis};

/// Arithmetic mean. NaN for an empty slice.
pub fn mean(x: ArrayView1<f64>) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.sum() / x.len() as f64
}

/// Standard deviation with the population (1/n) normalization.
pub fn pop_sd(x: ArrayView1<f64>) -> f64 {
    let m = mean(x);
    let var = x.fold(0., |acc, &v| acc + (v - m) * (v - m)) / x.len() as f64;
    var.sqrt()
}

/// Standardized deviate of the first entry of a permutation distribution
/// relative to the whole distribution, observed value included. Returns NaN
/// when the distribution has no spread.
pub fn effect_size(dist: ArrayView1<f64>) -> f64 {
    if dist.is_empty() {
        return f64::NAN;
    }
    let sd = pop_sd(dist);
    if !(sd > 0.) || !sd.is_finite() {
        return f64::NAN;
    }
    (dist[0] - mean(dist)) / sd
}

/// One-tailed permutation p-value for the first entry: the share of all
/// values (observed included) that are at least as large as the observed.
pub fn p_value(dist: ArrayView1<f64>) -> f64 {
    if dist.is_empty() {
        return f64::NAN;
    }
    let observed = dist[0];
    if observed.is_nan() {
        return f64::NAN;
    }
    let n_ge = dist.iter().filter(|&&v| v >= observed).count();
    n_ge as f64 / dist.len() as f64
}

/// Subtract the column means.
pub fn center_columns(x: &Array2<f64>) -> Array2<f64> {
    match x.mean_axis(Axis(0)) {
        Some(means) => x - &means,
        None => x.clone(),
    }
}

/// Effect size of the log statistic when every value is positive. A
/// distribution with zeros (e.g. permutations that tie the reduced model)
/// falls back to the raw scale. Returns the effect size and whether the log
/// scale was used.
pub fn log_effect_size(dist: ArrayView1<f64>) -> (f64, bool) {
    if !dist.is_empty() && dist.iter().all(|&v| v > 0.) {
        (effect_size(dist.mapv(f64::ln).view()), true)
    } else {
        (effect_size(dist), false)
    }
}
