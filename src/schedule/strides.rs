//! Per-operand stride tables over the execution domain.

/// Element strides of `dims` along each domain axis; 0 where it broadcasts.
///
/// Walking back to front, an axis where the operand matches the domain gets
/// the operand's own running stride. The running stride always advances by
/// the operand's dim, so a broadcast axis (dim 1) leaves it unchanged.
pub fn offset_calculation(dims: &[usize], domain: &[usize]) -> Vec<i64> {
    debug_assert_eq!(dims.len(), domain.len());
    let mut offsets = vec![0i64; dims.len()];
    let mut k = 1i64;
    for i in (0..dims.len()).rev() {
        offsets[i] = if dims[i] == domain[i] { k } else { 0 };
        k *= dims[i] as i64;
    }
    offsets
}

/// [`offset_calculation`] scaled to bytes.
pub fn byte_offsets(dims: &[usize], domain: &[usize], width: usize) -> Vec<i64> {
    offset_calculation(dims, domain)
        .into_iter()
        .map(|o| o * width as i64)
        .collect()
}

/// Byte offsets for every operand in `shapes`.
pub fn offset_table(shapes: &[Vec<usize>], domain: &[usize], width: usize) -> Vec<Vec<i64>> {
    shapes
        .iter()
        .map(|dims| byte_offsets(dims, domain, width))
        .collect()
}
