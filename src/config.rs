//! Harness configuration.

use serde::Serialize;

use crate::error::HarnessError;
use crate::matrix::{MatMulDims, DEFAULT_VALUE_BOUND};

/// Rows of A and C.
pub const DEFAULT_ROWS: usize = 3;
/// Columns of A, rows of B.
pub const DEFAULT_INNER: usize = 3;
/// Columns of B and C.
pub const DEFAULT_COLS: usize = 3;
/// Number of concurrent explicit-dispatch trials.
pub const DEFAULT_TRIALS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarnessConfig {
    pub dims: MatMulDims,
    pub trials: usize,
    /// Worker pool size. Defaults to the available parallelism.
    pub workers: usize,
    /// Base seed. Trial `i` uses `seed + i`; the offload trial uses
    /// `seed + trials`. `None` draws a base seed from entropy.
    pub seed: Option<u64>,
    /// Exclusive upper bound of generated elements.
    pub value_bound: i32,
    /// Free device buffers after each trial. When false every trial leaks its
    /// three buffers.
    pub release_device_memory: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            dims: MatMulDims::new(DEFAULT_ROWS, DEFAULT_INNER, DEFAULT_COLS),
            trials: DEFAULT_TRIALS,
            workers: default_workers(),
            seed: None,
            value_bound: DEFAULT_VALUE_BOUND,
            release_device_memory: true,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl HarnessConfig {
    pub fn with_dims(mut self, dims: MatMulDims) -> Self {
        self.dims = dims;
        self
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_value_bound(mut self, bound: i32) -> Self {
        self.value_bound = bound;
        self
    }

    pub fn with_release_device_memory(mut self, release: bool) -> Self {
        self.release_device_memory = release;
        self
    }

    /// Seed of trial `index`.
    pub fn trial_seed(&self, base: u64, index: usize) -> u64 {
        base.wrapping_add(index as u64)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        self.dims.validate()?;
        if self.workers == 0 {
            return Err(HarnessError::Config("workers must be at least 1".to_string()));
        }
        if self.value_bound <= 0 {
            return Err(HarnessError::Config(format!(
                "value bound must be positive, got {}",
                self.value_bound
            )));
        }
        Ok(())
    }
}
