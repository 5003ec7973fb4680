//! Tunables of the kernel scheduler.

use serde::{Deserialize, Serialize};

use crate::runtime::ConfigError;

pub const DEFAULT_MIN_RANK: usize = 6;
pub const DEFAULT_MIN_JIT_WORK_AMOUNT: usize = 256;
pub const DEFAULT_MAX_TILE_RANK: usize = 2;
pub const DEFAULT_MAX_HARNESS_DIMS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Domains are padded with leading ones up to this rank
    pub min_rank: usize,
    /// Collapse stops once the innermost work reaches this many elements
    pub min_jit_work_amount: usize,
    /// 1 = row tiles, 2 = two-dimensional tiles
    pub max_tile_rank: usize,
    /// Loop dims the kernel harness can index
    pub max_harness_dims: usize,
    /// Parallel partitions the collapse must preserve.
    /// `None` uses the current rayon thread count; compiled networks
    /// substitute the size of their own worker pool.
    pub min_concurrency: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            min_rank: DEFAULT_MIN_RANK,
            min_jit_work_amount: DEFAULT_MIN_JIT_WORK_AMOUNT,
            max_tile_rank: DEFAULT_MAX_TILE_RANK,
            max_harness_dims: DEFAULT_MAX_HARNESS_DIMS,
            min_concurrency: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_min_concurrency(mut self, concurrency: usize) -> Self {
        self.min_concurrency = Some(concurrency);
        self
    }

    pub fn with_max_tile_rank(mut self, rank: usize) -> Self {
        self.max_tile_rank = rank;
        self
    }

    pub fn with_min_jit_work_amount(mut self, amount: usize) -> Self {
        self.min_jit_work_amount = amount;
        self
    }

    /// Use `threads` unless a concurrency was set explicitly.
    pub fn or_concurrency(mut self, threads: usize) -> Self {
        self.min_concurrency.get_or_insert(threads);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.min_concurrency
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_rank < 2 {
            return Err(ConfigError::OutOfRange {
                key: "scheduler.min_rank",
                constraint: ">= 2",
                value: self.min_rank.to_string(),
            });
        }
        if !(1..=2).contains(&self.max_tile_rank) {
            return Err(ConfigError::OutOfRange {
                key: "scheduler.max_tile_rank",
                constraint: "1 or 2",
                value: self.max_tile_rank.to_string(),
            });
        }
        if self.max_harness_dims == 0 {
            return Err(ConfigError::OutOfRange {
                key: "scheduler.max_harness_dims",
                constraint: ">= 1",
                value: "0".to_string(),
            });
        }
        if self.min_concurrency == Some(0) {
            return Err(ConfigError::OutOfRange {
                key: "scheduler.min_concurrency",
                constraint: ">= 1",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
