//! Schedule definition and parallel kernel dispatch for one subgraph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, trace};

use super::collapse::{CollapseParams, DimensionCollapser};
use super::partition::splitter;
use super::strides::offset_table;
use super::types::{
    BufferPointers, ExecuteStats, ExecutionStrategy, OperandDescriptor, Schedule,
};
use super::{ScheduleError, ScheduleResult, SchedulerConfig};
use crate::codegen::{CallArgs, CompileArgs, CompiledKernel, KernelGenerator};
use crate::layout::{LayoutResult, ShapeLayout, TensorDesc};
use crate::subgraph::Subgraph;

const FIXED_LOOP_DIMS: usize = 5;
const FIXED_TENSOR_RANK: usize = FIXED_LOOP_DIMS + 1;

/// Owns the schedule and compiled kernel of one subgraph instantiation.
///
/// The schedule is defined once; `execute` can then be called any number of
/// times with fresh buffer pointers.
#[derive(Debug)]
pub struct KernelScheduler {
    schedule: Schedule,
    compile_args: CompileArgs,
    kernel: Option<CompiledKernel>,
}

impl KernelScheduler {
    pub fn define_schedule(
        subgraph: &Subgraph,
        inputs: &[TensorDesc],
        outputs: &[TensorDesc],
        generator: &dyn KernelGenerator,
        config: &SchedulerConfig,
    ) -> ScheduleResult<Self> {
        subgraph.validate()?;
        if inputs.is_empty() {
            return Err(ScheduleError::NoOperands("inputs"));
        }
        if outputs.is_empty() {
            return Err(ScheduleError::NoOperands("outputs"));
        }
        if inputs.len() != subgraph.parameters.len() {
            return Err(ScheduleError::OperandCount {
                what: "inputs",
                expected: subgraph.parameters.len(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != subgraph.results.len() {
            return Err(ScheduleError::OperandCount {
                what: "outputs",
                expected: subgraph.results.len(),
                actual: outputs.len(),
            });
        }

        let in_shapes = inputs
            .iter()
            .map(TensorDesc::blocked_shape)
            .collect::<LayoutResult<Vec<_>>>()?;
        let out_shapes = outputs
            .iter()
            .map(TensorDesc::blocked_shape)
            .collect::<LayoutResult<Vec<_>>>()?;
        let layout = ShapeLayout::canonicalize(&in_shapes, &out_shapes)?;

        let tensor_rank = config.min_rank.max(layout.rank());
        let padded = layout.padded_to(tensor_rank);
        let full_work_amount = padded.full_work_amount();
        let ShapeLayout {
            mut domain,
            inputs: mut in_dims,
            outputs: mut out_dims,
            element_type,
        } = padded;

        let collapser = DimensionCollapser::new(CollapseParams::from_config(config));
        let outcome = collapser.collapse(&mut in_dims, &mut out_dims, &mut domain)?;

        let width = inputs[0].element_size();
        let offsets_in = offset_table(&in_dims, &domain, width);
        let offsets_out = offset_table(&out_dims, &domain, width);

        let n = domain.len();
        let last = domain[n - 1];
        let ds = width as i64;
        let mut sch_dims = [1, last];
        let mut scheduler_work_amount = full_work_amount / last;
        let mut sch_offsets_in = vec![0i64; inputs.len()];
        let mut sch_offsets_out = vec![0i64; outputs.len()];
        if outcome.tile_rank > 1 {
            sch_dims[0] = domain[n - 2];
            scheduler_work_amount /= domain[n - 2];
            let row = last as i64 * ds;
            for (i, sch) in sch_offsets_in.iter_mut().enumerate() {
                let o = offsets_in[i][n - 2];
                *sch = if o > ds || (o == 0 && in_dims[i][n - 1] != 1) {
                    o - row
                } else if o == ds {
                    o
                } else {
                    0
                };
            }
            for (i, sch) in sch_offsets_out.iter_mut().enumerate() {
                *sch = offsets_out[i][n - 2] - row;
            }
            domain[n - 2] = 1;
        }

        let mut harness_num_dims = n - 1;
        let mut optimized_path_available = true;
        if harness_num_dims > config.max_harness_dims {
            debug!(
                harness_num_dims,
                max = config.max_harness_dims,
                "domain exceeds harness dims, optimized path disabled"
            );
            optimized_path_available = false;
            harness_num_dims = config.max_harness_dims;
        }

        let data_offsets: Vec<i64> = offsets_in
            .iter()
            .chain(offsets_out.iter())
            .flat_map(|row| row[..harness_num_dims].iter().copied())
            .collect();
        let compile_args = CompileArgs {
            output_dims: domain.clone(),
            scheduler_dims: sch_dims,
            scheduler_offsets: sch_offsets_in
                .iter()
                .chain(sch_offsets_out.iter())
                .copied()
                .collect(),
            data_offsets,
            harness_num_dims,
            num_inputs: inputs.len(),
            num_outputs: outputs.len(),
            input_broadcast_last: in_dims.iter().map(|d| d[n - 1] == 1).collect(),
            element_type,
            optimized_path_available,
            subgraph: subgraph.clone(),
        };
        let kernel = generator.generate(&compile_args)?;

        let strategy = if tensor_rank == FIXED_TENSOR_RANK {
            ExecutionStrategy::Fixed5D
        } else {
            ExecutionStrategy::Generic
        };

        let input_descs: Vec<OperandDescriptor> = inputs
            .iter()
            .zip(in_dims)
            .map(|(desc, dims)| OperandDescriptor::from_desc(desc, dims))
            .collect();
        let output_descs: Vec<OperandDescriptor> = outputs
            .iter()
            .zip(out_dims)
            .map(|(desc, dims)| OperandDescriptor::from_desc(desc, dims))
            .collect();

        let schedule = Schedule {
            tensor_rank,
            domain,
            full_work_amount,
            scheduler_work_amount,
            collapsed_dims: outcome.collapsed,
            tile_rank: outcome.tile_rank,
            sch_dims,
            sch_offsets_in,
            sch_offsets_out,
            offsets_in,
            offsets_out,
            start_offset_in: input_descs.iter().map(OperandDescriptor::start_offset).collect(),
            start_offset_out: output_descs.iter().map(OperandDescriptor::start_offset).collect(),
            inputs: input_descs,
            outputs: output_descs,
            harness_num_dims,
            optimized_path_available,
            strategy,
            element_type,
        };

        info!(
            subgraph = %subgraph.name,
            domain = ?schedule.domain,
            tile_rank = schedule.tile_rank,
            work_amount = schedule.scheduler_work_amount,
            strategy = %schedule.strategy,
            generator = generator.name(),
            kernel = kernel.as_ref().map(CompiledKernel::name).unwrap_or("none"),
            "defined subgraph schedule"
        );

        Ok(KernelScheduler {
            schedule,
            compile_args,
            kernel,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn compile_args(&self) -> &CompileArgs {
        &self.compile_args
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    pub fn is_optimized(&self) -> bool {
        self.schedule.optimized_path_available
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel.as_ref().map(CompiledKernel::name)
    }

    /// Run the kernel over the whole domain.
    ///
    /// # Safety
    ///
    /// Every pointer must address a live buffer holding at least the
    /// operand's start offset plus its physical extent, inputs must not be
    /// written during the call, and no other thread may access the outputs
    /// until it returns.
    pub unsafe fn execute(&self, buffers: &BufferPointers) -> ScheduleResult<ExecuteStats> {
        let kernel = match &self.kernel {
            Some(kernel) if self.schedule.optimized_path_available => kernel,
            _ => {
                return Err(ScheduleError::NotImplemented(
                    "can't use optimized implementation and can't fall back to reference"
                        .to_string(),
                ))
            }
        };
        let call = self.call_args(buffers)?;
        let counters = Counters::default();

        let partitions = match self.schedule.strategy {
            ExecutionStrategy::Fixed5D => self.run_fixed5d(kernel, &call, &counters)?,
            ExecutionStrategy::Generic => self.run_generic(kernel, &call, &counters)?,
        };

        let stats = counters.finish(partitions);
        trace!(
            invocations = stats.invocations,
            kernel_time_us = stats.kernel_time.as_micros() as u64,
            "executed subgraph kernel"
        );
        Ok(stats)
    }

    fn call_args(&self, buffers: &BufferPointers) -> ScheduleResult<CallArgs> {
        let schedule = &self.schedule;
        if buffers.inputs.len() != schedule.num_inputs() {
            return Err(ScheduleError::OperandCount {
                what: "input buffers",
                expected: schedule.num_inputs(),
                actual: buffers.inputs.len(),
            });
        }
        if buffers.outputs.len() != schedule.num_outputs() {
            return Err(ScheduleError::OperandCount {
                what: "output buffers",
                expected: schedule.num_outputs(),
                actual: buffers.outputs.len(),
            });
        }
        if let Some(index) = buffers.inputs.iter().position(|p| p.is_null()) {
            return Err(ScheduleError::NullBuffer {
                direction: "input",
                index,
            });
        }
        if let Some(index) = buffers.outputs.iter().position(|p| p.is_null()) {
            return Err(ScheduleError::NullBuffer {
                direction: "output",
                index,
            });
        }

        Ok(CallArgs {
            src_ptrs: buffers
                .inputs
                .iter()
                .zip(&schedule.start_offset_in)
                .map(|(p, &off)| p.wrapping_add(off))
                .collect(),
            dst_ptrs: buffers
                .outputs
                .iter()
                .zip(&schedule.start_offset_out)
                .map(|(p, &off)| p.wrapping_add(off))
                .collect(),
        })
    }

    /// Five nested loops over `domain[0..5]`, split into contiguous chunks.
    fn run_fixed5d(
        &self,
        kernel: &CompiledKernel,
        call: &CallArgs,
        counters: &Counters,
    ) -> ScheduleResult<usize> {
        let dims = &self.schedule.domain[..FIXED_LOOP_DIMS];
        let total: usize = dims.iter().product();
        let team = rayon::current_num_threads().min(total.max(1));

        (0..team).into_par_iter().try_for_each(|tid| {
            let range = splitter(total, team, tid);
            if range.is_empty() {
                return Ok(());
            }
            let started = Instant::now();
            let mut indexes = [0i64; FIXED_LOOP_DIMS];
            unravel(range.start, dims, &mut indexes);
            for _ in range.clone() {
                kernel.call(&indexes, call)?;
                advance(&mut indexes, dims);
            }
            counters.record(range.len(), started.elapsed());
            Ok::<(), ScheduleError>(())
        })?;
        Ok(team)
    }

    /// Flat work split with the equal splitter, indexes rebuilt per item.
    fn run_generic(
        &self,
        kernel: &CompiledKernel,
        call: &CallArgs,
        counters: &Counters,
    ) -> ScheduleResult<usize> {
        let schedule = &self.schedule;
        let dims = &schedule.domain[..schedule.domain.len() - 1];
        let work_amount = schedule.scheduler_work_amount;
        let team = rayon::current_num_threads();

        (0..team).into_par_iter().try_for_each(|tid| {
            let range = splitter(work_amount, team, tid);
            if range.is_empty() {
                return Ok(());
            }
            let started = Instant::now();
            let mut indexes = vec![0i64; dims.len()];
            for flat in range.clone() {
                unravel(flat, dims, &mut indexes);
                kernel.call(&indexes, call)?;
            }
            counters.record(range.len(), started.elapsed());
            Ok::<(), ScheduleError>(())
        })?;
        Ok(team)
    }
}

#[derive(Default)]
struct Counters {
    invocations: AtomicU64,
    kernel_nanos: AtomicU64,
}

impl Counters {
    fn record(&self, invocations: usize, elapsed: Duration) {
        self.invocations
            .fetch_add(invocations as u64, Ordering::Relaxed);
        self.kernel_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn finish(self, partitions: usize) -> ExecuteStats {
        ExecuteStats {
            invocations: self.invocations.into_inner(),
            kernel_time: Duration::from_nanos(self.kernel_nanos.into_inner()),
            partitions,
        }
    }
}

/// Row-major decomposition of `flat` over `dims`.
fn unravel(mut flat: usize, dims: &[usize], indexes: &mut [i64]) {
    for (idx, &dim) in indexes.iter_mut().zip(dims).rev() {
        *idx = (flat % dim) as i64;
        flat /= dim;
    }
}

/// Increment a row-major odometer by one.
fn advance(indexes: &mut [i64], dims: &[usize]) {
    for (idx, &dim) in indexes.iter_mut().zip(dims).rev() {
        *idx += 1;
        if (*idx as usize) < dim {
            return;
        }
        *idx = 0;
    }
}
