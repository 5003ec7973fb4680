//! Equal contiguous work splitting across a thread team.

use std::ops::Range;

/// Range of `n` work items owned by thread `tid` out of `team`.
///
/// The first `n - (ceil(n/team) - 1) * team` threads get one item more than
/// the rest. Ranges are contiguous, ordered by `tid`, and cover `0..n`.
pub fn splitter(n: usize, team: usize, tid: usize) -> Range<usize> {
    if team <= 1 || n == 0 {
        return 0..n;
    }
    let n1 = n.div_ceil(team);
    let n2 = n1 - 1;
    let t1 = n - n2 * team;
    let len = if tid < t1 { n1 } else { n2 };
    let start = if tid <= t1 {
        tid * n1
    } else {
        t1 * n1 + (tid - t1) * n2
    };
    start..start + len
}

/// Every thread's range, in `tid` order.
pub fn partitions(n: usize, team: usize) -> Vec<Range<usize>> {
    (0..team.max(1)).map(|tid| splitter(n, team, tid)).collect()
}
