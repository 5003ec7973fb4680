//! Interpreting kernel generator for f32 subgraph bodies.
//!
//! The produced kernel mirrors the pointer walk of a JIT harness: operand
//! pointers start at `base + sum(idx[d] * offset[d])`, the tile is walked
//! row by row, inputs advance along the innermost axis unless broadcast,
//! outputs always advance, and every row ends with the scheduler offset.

use tracing::debug;

use super::{
    CallArgs, CodegenError, CodegenResult, CompileArgs, CompiledKernel, KernelError,
    KernelGenerator, KernelResult,
};
use crate::layout::ElementType;
use crate::subgraph::{Op, Subgraph};

pub const REFERENCE_GENERATOR: &str = "reference";

#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceGenerator;

impl ReferenceGenerator {
    pub fn new() -> Self {
        ReferenceGenerator
    }
}

impl KernelGenerator for ReferenceGenerator {
    fn name(&self) -> &str {
        REFERENCE_GENERATOR
    }

    fn supports(&self, element_type: ElementType) -> bool {
        element_type == ElementType::F32
    }

    fn generate(&self, args: &CompileArgs) -> CodegenResult<Option<CompiledKernel>> {
        if !self.supports(args.element_type) {
            debug!(
                subgraph = %args.subgraph.name,
                element_type = %args.element_type,
                "reference generator has no kernel for this precision"
            );
            return Ok(None);
        }
        args.validate()?;

        let program = Program::lower(&args.subgraph, args.num_inputs, args.num_outputs)?;
        let harness = Harness::from_args(args);
        let name = format!("{}_{}", REFERENCE_GENERATOR, args.subgraph.name);
        Ok(Some(CompiledKernel::new(name, move |indexes, call| {
            run_tile(&program, &harness, indexes, call)
        })))
    }
}

/// Body flattened into value slots: parameters first, then node results.
#[derive(Debug, Clone)]
struct Program {
    num_params: usize,
    nodes: Vec<(Op, Vec<usize>)>,
    results: Vec<usize>,
}

impl Program {
    fn lower(subgraph: &Subgraph, num_inputs: usize, num_outputs: usize) -> CodegenResult<Self> {
        if subgraph.parameters.len() != num_inputs || subgraph.results.len() != num_outputs {
            return Err(CodegenError::InvalidArgs(format!(
                "body has {} parameters and {} results, schedule has {} inputs and {} outputs",
                subgraph.parameters.len(),
                subgraph.results.len(),
                num_inputs,
                num_outputs
            )));
        }
        let nodes = subgraph
            .body
            .iter()
            .map(|node| {
                if node.op.arity() > 2 {
                    return Err(CodegenError::UnsupportedBody {
                        op: node.op.name().to_string(),
                        reason: "more than two operands".to_string(),
                    });
                }
                Ok((node.op, node.inputs.iter().map(|v| v.0).collect()))
            })
            .collect::<CodegenResult<Vec<_>>>()?;
        Ok(Program {
            num_params: subgraph.parameters.len(),
            nodes,
            results: subgraph.results.iter().map(|v| v.0).collect(),
        })
    }

    fn num_values(&self) -> usize {
        self.num_params + self.nodes.len()
    }

    #[inline]
    fn eval(&self, values: &mut [f32]) {
        let mut operands = [0.0f32; 2];
        for (k, (op, inputs)) in self.nodes.iter().enumerate() {
            for (slot, &src) in inputs.iter().enumerate() {
                operands[slot] = values[src];
            }
            values[self.num_params + k] = op.eval(&operands[..inputs.len()]);
        }
    }
}

#[derive(Debug, Clone)]
struct Harness {
    dims: usize,
    data_offsets: Vec<i64>,
    tile: [usize; 2],
    sch_offsets: Vec<i64>,
    advance_in: Vec<bool>,
    num_inputs: usize,
    num_outputs: usize,
    width: isize,
}

impl Harness {
    fn from_args(args: &CompileArgs) -> Self {
        Harness {
            dims: args.harness_num_dims,
            data_offsets: args.data_offsets.clone(),
            tile: args.scheduler_dims,
            sch_offsets: args.scheduler_offsets.clone(),
            advance_in: args.input_broadcast_last.iter().map(|b| !b).collect(),
            num_inputs: args.num_inputs,
            num_outputs: args.num_outputs,
            width: args.element_type.size() as isize,
        }
    }

    fn base_offset(&self, operand: usize, indexes: &[i64]) -> isize {
        let offsets = &self.data_offsets[operand * self.dims..(operand + 1) * self.dims];
        offsets
            .iter()
            .zip(indexes)
            .map(|(&off, &idx)| off * idx)
            .sum::<i64>() as isize
    }
}

fn run_tile(
    program: &Program,
    harness: &Harness,
    indexes: &[i64],
    call: &CallArgs,
) -> KernelResult<()> {
    if indexes.len() < harness.dims {
        return Err(KernelError::IndexRank {
            expected: harness.dims,
            actual: indexes.len(),
        });
    }
    let operands = call.src_ptrs.len() + call.dst_ptrs.len();
    if call.src_ptrs.len() != harness.num_inputs || call.dst_ptrs.len() != harness.num_outputs {
        return Err(KernelError::OperandCount {
            expected: harness.num_inputs + harness.num_outputs,
            actual: operands,
        });
    }

    let mut src: Vec<*const u8> = call
        .src_ptrs
        .iter()
        .enumerate()
        .map(|(i, p)| p.wrapping_offset(harness.base_offset(i, indexes)))
        .collect();
    let mut dst: Vec<*mut u8> = call
        .dst_ptrs
        .iter()
        .enumerate()
        .map(|(j, p)| p.wrapping_offset(harness.base_offset(harness.num_inputs + j, indexes)))
        .collect();

    let mut values = vec![0.0f32; program.num_values()];
    let width = harness.width;

    for _ in 0..harness.tile[0] {
        for _ in 0..harness.tile[1] {
            for (i, ptr) in src.iter_mut().enumerate() {
                // SAFETY: the schedule's offsets keep every address inside the
                // operand buffer the caller handed to execute.
                values[i] = unsafe { (*ptr as *const f32).read_unaligned() };
                if harness.advance_in[i] {
                    *ptr = ptr.wrapping_offset(width);
                }
            }

            program.eval(&mut values);

            for (j, ptr) in dst.iter_mut().enumerate() {
                // SAFETY: as above; partitions never share output elements.
                unsafe { (*ptr as *mut f32).write_unaligned(values[program.results[j]]) };
                *ptr = ptr.wrapping_offset(width);
            }
        }

        for (i, ptr) in src.iter_mut().enumerate() {
            *ptr = ptr.wrapping_offset(harness.sch_offsets[i] as isize);
        }
        for (j, ptr) in dst.iter_mut().enumerate() {
            *ptr = ptr.wrapping_offset(harness.sch_offsets[harness.num_inputs + j] as isize);
        }
    }
    Ok(())
}
