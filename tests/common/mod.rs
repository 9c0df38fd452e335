//! Utility functions for testing
#![allow(dead_code)]
use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2};
use ndarray_rrpp::{DesignMatrix, Term};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::{
    fs::File,
    io::{BufRead, BufReader},
};

/// Install a logger that prints through the test harness. Safe to call from
/// every test.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Read group labels and a response from a CSV with one `label,y` pair per
/// line.
pub fn groups_y_from_csv(file: &str) -> Result<(Vec<usize>, Array1<f64>)> {
    let file = File::open(file)?;
    let reader = BufReader::new(file);
    let mut labels: Vec<usize> = Vec::new();
    let mut y_vec: Vec<f64> = Vec::new();
    for line_result in reader.lines() {
        let line = line_result?;
        let split_line: Vec<&str> = line.split(',').collect();
        if split_line.len() != 2 {
            return Err(anyhow!("Expected two entries in CSV"));
        }
        labels.push(split_line[0].parse()?);
        y_vec.push(split_line[1].parse()?);
    }
    Ok((labels, Array1::from(y_vec)))
}

/// Treatment coding of integer labels: one indicator column per level
/// after the first.
pub fn dummy_code(labels: &[usize]) -> Array2<f64> {
    let n_levels = labels.iter().max().map_or(0, |m| m + 1);
    Array2::from_shape_fn((labels.len(), n_levels.saturating_sub(1)), |(i, j)| {
        if labels[i] == j + 1 {
            1.
        } else {
            0.
        }
    })
}

/// Labels `0..n_levels` repeated in order until there are `n` of them.
pub fn balanced_labels(n: usize, n_levels: usize) -> Vec<usize> {
    (0..n).map(|i| i % n_levels).collect()
}

/// Uniform noise on (-1, 1) from a seeded generator.
pub fn noise(n: usize, p: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((n, p), || rng.gen_range(-1.0..1.0))
}

/// A continuous covariate from a seeded generator.
pub fn covariate(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((n, 1), || rng.gen_range(0.0..10.0))
}

/// Multivariate response with a group shift of `effect` in every variable.
pub fn grouped_response(labels: &[usize], p: usize, effect: f64, seed: u64) -> Array2<f64> {
    let mut y = noise(labels.len(), p, seed);
    for (mut row, &label) in y.rows_mut().into_iter().zip(labels) {
        row += effect * label as f64;
    }
    y
}

/// An intercept plus a single categorical term.
pub fn one_factor_design(name: &str, labels: &[usize]) -> Result<DesignMatrix> {
    Ok(DesignMatrix::from_blocks(
        true,
        vec![(Term::new(name), dummy_code(labels))],
    )?)
}
