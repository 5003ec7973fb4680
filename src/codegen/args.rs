//! Argument structures passed to kernel generators and compiled kernels.

use serde::Serialize;

use super::{CodegenError, CodegenResult};
use crate::layout::ElementType;
use crate::subgraph::Subgraph;

/// Compile-time scheduling metadata handed to a [`KernelGenerator`](super::KernelGenerator).
#[derive(Debug, Clone, Serialize)]
pub struct CompileArgs {
    /// Collapsed execution domain, tile-adjusted
    pub output_dims: Vec<usize>,
    /// Rows and columns of one kernel tile
    pub scheduler_dims: [usize; 2],
    /// Per-row pointer correction, inputs first then outputs
    pub scheduler_offsets: Vec<i64>,
    /// Per-operand byte offsets, `harness_num_dims` entries per operand
    pub data_offsets: Vec<i64>,
    pub harness_num_dims: usize,
    pub num_inputs: usize,
    pub num_outputs: usize,
    /// Input innermost dim is 1, so its loader never advances
    pub input_broadcast_last: Vec<bool>,
    pub element_type: ElementType,
    pub optimized_path_available: bool,
    #[serde(skip)]
    pub subgraph: Subgraph,
}

impl CompileArgs {
    pub fn num_operands(&self) -> usize {
        self.num_inputs + self.num_outputs
    }

    /// Harness offsets of operand `index` (inputs first, then outputs).
    pub fn operand_offsets(&self, index: usize) -> &[i64] {
        let start = index * self.harness_num_dims;
        &self.data_offsets[start..start + self.harness_num_dims]
    }

    pub fn validate(&self) -> CodegenResult<()> {
        let operands = self.num_operands();
        if self.data_offsets.len() != operands * self.harness_num_dims {
            return Err(CodegenError::InvalidArgs(format!(
                "expected {} data offsets, got {}",
                operands * self.harness_num_dims,
                self.data_offsets.len()
            )));
        }
        if self.scheduler_offsets.len() != operands {
            return Err(CodegenError::InvalidArgs(format!(
                "expected {} scheduler offsets, got {}",
                operands,
                self.scheduler_offsets.len()
            )));
        }
        if self.input_broadcast_last.len() != self.num_inputs {
            return Err(CodegenError::InvalidArgs(format!(
                "expected {} input broadcast flags, got {}",
                self.num_inputs,
                self.input_broadcast_last.len()
            )));
        }
        Ok(())
    }
}

/// Runtime operand pointers for one kernel dispatch.
///
/// Pointers already include each operand's start offset.
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub src_ptrs: Vec<*const u8>,
    pub dst_ptrs: Vec<*mut u8>,
}

// SAFETY: CallArgs only carries addresses. They are dereferenced by kernels
// during `KernelScheduler::execute`, whose caller guarantees the buffers stay
// alive and that partitions write disjoint output memory.
unsafe impl Send for CallArgs {}
unsafe impl Sync for CallArgs {}
