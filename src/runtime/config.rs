//! Runtime configuration.
//!
//! Values come from the builder methods or from environment variables:
//! - `SNIPFORGE_NUM_THREADS`: worker pool size
//! - `SNIPFORGE_GENERATOR`: kernel generator name
//! - `SNIPFORGE_PROFILING`: "1"/"true" or "0"/"false"
//! - `SNIPFORGE_MAX_REQUESTS`: live infer requests per network

use std::env;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codegen::reference::REFERENCE_GENERATOR;
use crate::schedule::SchedulerConfig;

pub const ENV_NUM_THREADS: &str = "SNIPFORGE_NUM_THREADS";
pub const ENV_GENERATOR: &str = "SNIPFORGE_GENERATOR";
pub const ENV_PROFILING: &str = "SNIPFORGE_PROFILING";
pub const ENV_MAX_REQUESTS: &str = "SNIPFORGE_MAX_REQUESTS";

pub const DEFAULT_MAX_REQUESTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be {constraint}, got {value}")]
    OutOfRange {
        key: &'static str,
        constraint: &'static str,
        value: String,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown kernel generator: {0}")]
    UnknownGenerator(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub num_threads: usize,
    pub scheduler: SchedulerConfig,
    pub generator: String,
    pub enable_profiling: bool,
    pub max_requests: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            num_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            scheduler: SchedulerConfig::default(),
            generator: REFERENCE_GENERATOR.to_string(),
            enable_profiling: true,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by any `SNIPFORGE_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = env::var(ENV_NUM_THREADS) {
            config.num_threads = parse_usize(ENV_NUM_THREADS, &value)?;
        }
        if let Ok(value) = env::var(ENV_GENERATOR) {
            config.generator = value;
        }
        if let Ok(value) = env::var(ENV_PROFILING) {
            config.enable_profiling = parse_bool(ENV_PROFILING, &value)?;
        }
        if let Ok(value) = env::var(ENV_MAX_REQUESTS) {
            config.max_requests = parse_usize(ENV_MAX_REQUESTS, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == 0 {
            return Err(ConfigError::OutOfRange {
                key: "num_threads",
                constraint: ">= 1",
                value: "0".to_string(),
            });
        }
        if self.max_requests == 0 {
            return Err(ConfigError::OutOfRange {
                key: "max_requests",
                constraint: ">= 1",
                value: "0".to_string(),
            });
        }
        if self.generator.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "generator",
                value: String::new(),
            });
        }
        self.scheduler.validate()
    }
}

fn parse_usize(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
