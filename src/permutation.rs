//! Generation of the row permutations that build the empirical null
//! distributions.

use crate::error::{RrppError, RrppResult};
use itertools::Itertools;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hash::Hash;

/// Seeding of the permutation generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// Use the number of iterations as the seed, so that an analysis is
    /// reproducible without choosing a seed.
    Default,
    Fixed(u64),
    /// Draw a seed from the operating system once, when the schedule is built.
    Random,
}

impl Default for Seed {
    fn default() -> Self {
        Self::Default
    }
}

impl Seed {
    fn resolve(self, iterations: usize) -> u64 {
        match self {
            Self::Default => iterations as u64,
            Self::Fixed(seed) => seed,
            Self::Random => rand::random(),
        }
    }
}

/// An immutable sequence of permutations of `0..n`. The first entry is
/// always the identity, so every distribution built from the schedule holds
/// the observed statistic at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationSchedule {
    perms: Vec<Vec<usize>>,
    seed: Option<u64>,
}

impl PermutationSchedule {
    /// Generate `iterations` random permutations after the identity. With
    /// `blocks`, a label per row, rows only trade places with rows that carry
    /// the same label.
    pub fn new(
        n: usize,
        iterations: usize,
        seed: Seed,
        blocks: Option<&[usize]>,
    ) -> RrppResult<Self> {
        let groups: Vec<Vec<usize>> = match blocks {
            None => vec![(0..n).collect()],
            Some(labels) => {
                if labels.len() != n {
                    return Err(RrppError::BadInput(format!(
                        "{} block labels for {} observations",
                        labels.len(),
                        n
                    )));
                }
                block_groups(labels)
            }
        };
        let seed = seed.resolve(iterations);
        log::debug!(
            "Generating {} permutations of {} rows in {} block(s) with seed {}",
            iterations,
            n,
            groups.len(),
            seed
        );

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let identity: Vec<usize> = (0..n).collect();
        let mut perms = Vec::with_capacity(iterations + 1);
        perms.push(identity.clone());
        for _ in 0..iterations {
            let mut perm = identity.clone();
            for group in &groups {
                let mut shuffled = group.clone();
                shuffled.shuffle(&mut rng);
                for (&slot, &row) in group.iter().zip(shuffled.iter()) {
                    perm[slot] = row;
                }
            }
            perms.push(perm);
        }
        Ok(Self {
            perms,
            seed: Some(seed),
        })
    }

    /// Use externally generated permutations. The first must be the identity
    /// and every entry must be a permutation of the same rows.
    pub fn from_permutations(perms: Vec<Vec<usize>>) -> RrppResult<Self> {
        let n = match perms.first() {
            Some(first) => first.len(),
            None => {
                return Err(RrppError::BadInput(
                    "a schedule needs at least the identity permutation".to_string(),
                ))
            }
        };
        if perms[0].iter().enumerate().any(|(i, &p)| i != p) {
            return Err(RrppError::BadInput(
                "the first permutation must be the identity".to_string(),
            ));
        }
        for (j, perm) in perms.iter().enumerate() {
            let is_perm = perm.len() == n && perm.iter().sorted().enumerate().all(|(i, &p)| i == p);
            if !is_perm {
                return Err(RrppError::BadInput(format!(
                    "entry {} is not a permutation of {} rows",
                    j, n
                )));
            }
        }
        Ok(Self { perms, seed: None })
    }

    /// The number of permutations including the identity.
    pub fn len(&self) -> usize {
        self.perms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perms.is_empty()
    }

    /// The number of random permutations.
    pub fn iterations(&self) -> usize {
        self.perms.len() - 1
    }

    /// The number of rows being permuted.
    pub fn n_obs(&self) -> usize {
        self.perms[0].len()
    }

    /// The seed the schedule was generated with, if it was generated here.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn get(&self, j: usize) -> &[usize] {
        &self.perms[j]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.perms.iter().map(Vec::as_slice)
    }
}

/// Generate a schedule. See [`PermutationSchedule::new`].
pub fn schedule(
    n: usize,
    iterations: usize,
    seed: Seed,
    blocks: Option<&[usize]>,
) -> RrppResult<PermutationSchedule> {
    PermutationSchedule::new(n, iterations, seed, blocks)
}

/// Convert arbitrary block labels to consecutive integers in order of first
/// appearance.
pub fn block_labels<T: Hash + Eq + Clone>(labels: &[T]) -> Vec<usize> {
    let levels = labels.iter().unique().cloned().collect_vec();
    labels
        .iter()
        .map(|l| levels.iter().position(|v| v == l).unwrap_or_default())
        .collect()
}

/// Row indices of each block, ordered by first row so the generator consumes
/// random numbers in a fixed order.
fn block_groups(labels: &[usize]) -> Vec<Vec<usize>> {
    labels
        .iter()
        .enumerate()
        .map(|(row, &label)| (label, row))
        .into_group_map()
        .into_values()
        .sorted_by_key(|rows| rows[0])
        .collect()
}
