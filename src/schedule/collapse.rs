//! Greedy merging of trailing domain dimensions.
//!
//! Small innermost loops waste kernel invocations, so trailing dims are
//! merged while the innermost work stays below `min_jit_work_amount` and the
//! remaining outer work still feeds `min_concurrency` partitions. A pair of
//! dims can only merge when no operand broadcasts across exactly one of them.
//! Otherwise the schedule falls back to two-dimensional tiles.

use tracing::debug;

use super::{ScheduleError, ScheduleResult, SchedulerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapseParams {
    pub min_jit_work_amount: usize,
    pub min_concurrency: usize,
    pub max_tile_rank: usize,
}

impl CollapseParams {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        CollapseParams {
            min_jit_work_amount: config.min_jit_work_amount,
            min_concurrency: config.concurrency(),
            max_tile_rank: config.max_tile_rank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollapseOutcome {
    /// Number of trailing pairs merged
    pub collapsed: usize,
    pub tile_rank: usize,
}

#[derive(Debug, Clone)]
pub struct DimensionCollapser {
    params: CollapseParams,
}

impl DimensionCollapser {
    pub fn new(params: CollapseParams) -> Self {
        DimensionCollapser { params }
    }

    pub fn params(&self) -> &CollapseParams {
        &self.params
    }

    /// Collapse `domain` and every operand in place, starting at tile rank 1.
    pub fn collapse(
        &self,
        inputs: &mut [Vec<usize>],
        outputs: &mut [Vec<usize>],
        domain: &mut [usize],
    ) -> ScheduleResult<CollapseOutcome> {
        let mut tile_rank = 1;
        let collapsed = self.find_dims_to_collapse(inputs, outputs, domain, &mut tile_rank)?;
        Ok(CollapseOutcome {
            collapsed,
            tile_rank,
        })
    }

    /// Returns the number of merged pairs; `tile_rank` may be raised.
    ///
    /// Operands must be padded to `domain.len()`.
    pub fn find_dims_to_collapse(
        &self,
        inputs: &mut [Vec<usize>],
        outputs: &mut [Vec<usize>],
        domain: &mut [usize],
        tile_rank: &mut usize,
    ) -> ScheduleResult<usize> {
        let rank = domain.len();
        let Some(&last) = domain.last() else {
            return Ok(0);
        };
        let full_work_amount: usize = domain.iter().product();
        let mut current = last;
        let mut collapsed = 0;

        while current < self.params.min_jit_work_amount && current < full_work_amount {
            if rank < collapsed + 2 {
                break;
            }

            let can_collapse = inputs
                .iter()
                .chain(outputs.iter())
                .all(|dims| trailing_pair_consistent(dims));

            let next = current.saturating_mul(domain[rank - 2]);
            if full_work_amount / next < self.params.min_concurrency {
                break;
            }
            current = next;

            if !can_collapse {
                if *tile_rank < self.params.max_tile_rank {
                    *tile_rank += 1;
                    continue;
                }
                break;
            }

            for dims in inputs.iter_mut().chain(outputs.iter_mut()) {
                collapse_last_dims(dims, 1)?;
            }
            collapse_last_dims(domain, 1)?;
            collapsed += 1;
        }

        debug!(
            domain = ?domain,
            collapsed,
            tile_rank = *tile_rank,
            innermost_work = current,
            "collapsed execution domain"
        );
        Ok(collapsed)
    }
}

/// Both trailing dims are 1, or neither is.
fn trailing_pair_consistent(dims: &[usize]) -> bool {
    match dims {
        [.., a, b] => (*a == 1) == (*b == 1),
        _ => true,
    }
}

/// Merge the last `k + 1` dims into the last one, keeping the rank.
///
/// `[a, b, c, d]` with `k = 1` becomes `[1, a, b, c * d]`.
pub fn collapse_last_dims(dims: &mut [usize], k: usize) -> ScheduleResult<()> {
    let rank = dims.len();
    if rank == 0 || k >= rank - 1 {
        return Err(ScheduleError::InvalidCollapse { requested: k, rank });
    }
    for i in rank - k - 1..rank - 1 {
        dims[rank - 1] *= dims[i];
    }
    for i in (k..rank - 1).rev() {
        dims[i] = dims[i - k];
    }
    for dim in dims.iter_mut().take(k) {
        *dim = 1;
    }
    Ok(())
}
