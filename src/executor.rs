//! Executors that map a function over permutation indices. Results always
//! come back in index order, whatever order they were computed in.

use crate::error::RrppResult;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

pub trait Executor {
    /// Evaluate `f` at `0..n`, returning the results in index order.
    fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync;
}

/// Evaluates on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        (0..n).map(f).collect()
    }
}

/// Evaluates on a rayon thread pool, either the global one or a dedicated
/// pool with a fixed number of threads.
#[derive(Debug, Default)]
pub struct Parallel {
    pool: Option<ThreadPool>,
}

impl Parallel {
    /// Use rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Use a dedicated pool with `n_threads` workers.
    pub fn with_threads(n_threads: usize) -> RrppResult<Self> {
        let pool = ThreadPoolBuilder::new().num_threads(n_threads).build()?;
        Ok(Self { pool: Some(pool) })
    }

    pub fn n_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl Executor for Parallel {
    fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        // indexed parallel iterators collect in order
        let run = || (0..n).into_par_iter().map(&f).collect::<Vec<T>>();
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}
