use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::layout::{ElementType, TensorDesc};

/// Operand as seen by the scheduler: padded shape, width and start offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperandDescriptor {
    pub shape: Vec<usize>,
    pub element_size: usize,
    /// Leading padding, in elements
    pub offset_padding: usize,
}

impl OperandDescriptor {
    pub fn from_desc(desc: &TensorDesc, shape: Vec<usize>) -> Self {
        OperandDescriptor {
            shape,
            element_size: desc.element_size(),
            offset_padding: desc.offset_padding,
        }
    }

    /// Byte offset of the first element.
    pub fn start_offset(&self) -> usize {
        self.offset_padding * self.element_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStrategy {
    /// Rank-6 domain walked as five nested parallel loops
    Fixed5D,
    /// Flat work split over the thread team
    Generic,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Fixed5D => write!(f, "fixed5d"),
            ExecutionStrategy::Generic => write!(f, "generic"),
        }
    }
}

/// Immutable result of schedule definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub tensor_rank: usize,
    /// Collapsed domain; the tiled dim is reset to 1
    pub domain: Vec<usize>,
    pub full_work_amount: usize,
    /// Kernel invocations per execute
    pub scheduler_work_amount: usize,
    pub collapsed_dims: usize,
    pub tile_rank: usize,
    pub sch_dims: [usize; 2],
    pub sch_offsets_in: Vec<i64>,
    pub sch_offsets_out: Vec<i64>,
    /// Byte offsets per domain axis, one row per operand
    pub offsets_in: Vec<Vec<i64>>,
    pub offsets_out: Vec<Vec<i64>>,
    pub start_offset_in: Vec<usize>,
    pub start_offset_out: Vec<usize>,
    pub inputs: Vec<OperandDescriptor>,
    pub outputs: Vec<OperandDescriptor>,
    pub harness_num_dims: usize,
    pub optimized_path_available: bool,
    pub strategy: ExecutionStrategy,
    pub element_type: ElementType,
}

impl Schedule {
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }
}

/// Base addresses of every operand for one execute call.
#[derive(Debug, Clone)]
pub struct BufferPointers {
    pub inputs: Vec<*const u8>,
    pub outputs: Vec<*mut u8>,
}

impl BufferPointers {
    pub fn new(inputs: Vec<*const u8>, outputs: Vec<*mut u8>) -> Self {
        BufferPointers { inputs, outputs }
    }
}

// SAFETY: addresses only; see `KernelScheduler::execute` for the contract on
// the memory behind them.
unsafe impl Send for BufferPointers {}
unsafe impl Sync for BufferPointers {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteStats {
    pub invocations: u64,
    /// Kernel time summed over workers
    pub kernel_time: Duration,
    pub partitions: usize,
}
