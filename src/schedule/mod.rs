//! Subgraph kernel scheduling: dimension collapse, stride tables, tiling and
//! parallel dispatch of a compiled kernel.

pub mod collapse;
pub mod config;
pub mod partition;
pub mod scheduler;
pub mod strides;
pub mod types;

use thiserror::Error;

use crate::codegen::{CodegenError, KernelError};
use crate::layout::LayoutError;
use crate::subgraph::SubgraphError;

pub use collapse::{collapse_last_dims, CollapseOutcome, CollapseParams, DimensionCollapser};
pub use config::SchedulerConfig;
pub use partition::{partitions, splitter};
pub use scheduler::KernelScheduler;
pub use strides::{byte_offsets, offset_calculation, offset_table};
pub use types::{BufferPointers, ExecuteStats, ExecutionStrategy, OperandDescriptor, Schedule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Subgraph(#[from] SubgraphError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("subgraph has no {0}")]
    NoOperands(&'static str),
    #[error("cannot collapse {requested} trailing dims of a rank {rank} shape")]
    InvalidCollapse { requested: usize, rank: usize },
    #[error("expected {expected} {what}, got {actual}")]
    OperandCount {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{direction} buffer {index} is null")]
    NullBuffer {
        direction: &'static str,
        index: usize,
    },
    #[error("{0}")]
    NotImplemented(String),
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;
