//! Canonical execution-domain shapes.
//!
//! Operand shapes arrive in memory order (see [`BlockedShape`]). They are
//! right-aligned against each other, padded with leading ones, and merged
//! with numpy broadcasting into a single execution domain.

use serde::Serialize;
use tracing::trace;

use super::{BlockedShape, ElementType, LayoutError, LayoutResult};

/// Canonical shapes for one subgraph instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeLayout {
    /// Broadcast of all output shapes
    pub domain: Vec<usize>,
    /// Input shapes padded to `domain.len()`
    pub inputs: Vec<Vec<usize>>,
    /// Output shapes padded to `domain.len()`
    pub outputs: Vec<Vec<usize>>,
    pub element_type: ElementType,
}

impl ShapeLayout {
    /// Merge operand shapes into a common execution domain.
    ///
    /// All operands must share precision. Non-planar operands force every
    /// operand onto the same blocking order, since lower-rank planar inputs
    /// cannot be aligned against a blocked channel axis.
    pub fn canonicalize(
        inputs: &[BlockedShape],
        outputs: &[BlockedShape],
    ) -> LayoutResult<Self> {
        let first = outputs.first().ok_or(LayoutError::NoOperands("outputs"))?;
        if inputs.is_empty() {
            return Err(LayoutError::NoOperands("inputs"));
        }

        let element_type = first.element_type;
        for shape in inputs.iter().chain(outputs.iter()) {
            if shape.element_type != element_type {
                return Err(LayoutError::MixedPrecision(element_type, shape.element_type));
            }
            if shape.dims.iter().any(|&d| d == 0) {
                return Err(LayoutError::ZeroDim(shape.dims.clone()));
            }
        }

        let blocked = inputs.iter().chain(outputs.iter()).find(|s| !s.is_planar());
        if let Some(reference) = blocked {
            for shape in inputs.iter().chain(outputs.iter()) {
                if shape.order != reference.order {
                    return Err(LayoutError::IncompatibleLayouts(format!(
                        "order {:?} vs {:?}",
                        shape.order, reference.order
                    )));
                }
            }
        }

        let mut domain: Vec<usize> = Vec::new();
        for shape in outputs {
            domain = broadcast_merge(&domain, &shape.dims)?;
        }

        let mut merged_inputs: Vec<usize> = Vec::new();
        for shape in inputs {
            merged_inputs = broadcast_merge(&merged_inputs, &shape.dims)?;
        }
        let checked = broadcast_merge(&domain, &merged_inputs)?;
        if checked != domain {
            return Err(LayoutError::BroadcastMismatch {
                axis: first_difference(&checked, &domain),
                lhs: merged_inputs,
                rhs: domain,
            });
        }

        let rank = domain.len();
        let layout = ShapeLayout {
            inputs: inputs.iter().map(|s| prepend_with_ones(&s.dims, rank)).collect(),
            outputs: outputs.iter().map(|s| prepend_with_ones(&s.dims, rank)).collect(),
            domain,
            element_type,
        };
        trace!(domain = ?layout.domain, inputs = layout.inputs.len(), outputs = layout.outputs.len(), "canonicalized subgraph shapes");
        Ok(layout)
    }

    pub fn rank(&self) -> usize {
        self.domain.len()
    }

    /// Pad the domain and every operand with leading ones up to `rank`.
    pub fn padded_to(&self, rank: usize) -> Self {
        ShapeLayout {
            domain: prepend_with_ones(&self.domain, rank),
            inputs: self.inputs.iter().map(|d| prepend_with_ones(d, rank)).collect(),
            outputs: self.outputs.iter().map(|d| prepend_with_ones(d, rank)).collect(),
            element_type: self.element_type,
        }
    }

    pub fn full_work_amount(&self) -> usize {
        self.domain.iter().product()
    }
}

/// Right-align `dims` inside a shape of `rank` entries filled with ones.
///
/// Shapes that already have `rank` or more entries are returned unchanged.
pub fn prepend_with_ones(dims: &[usize], rank: usize) -> Vec<usize> {
    if rank <= dims.len() {
        return dims.to_vec();
    }
    let mut result = vec![1; rank];
    result[rank - dims.len()..].copy_from_slice(dims);
    result
}

/// Numpy-style broadcast of two right-aligned shapes.
pub fn broadcast_merge(lhs: &[usize], rhs: &[usize]) -> LayoutResult<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let a = prepend_with_ones(lhs, rank);
    let b = prepend_with_ones(rhs, rank);
    a.iter()
        .zip(b.iter())
        .enumerate()
        .map(|(axis, (&x, &y))| match (x, y) {
            _ if x == y => Ok(x),
            (1, _) => Ok(y),
            (_, 1) => Ok(x),
            _ => Err(LayoutError::BroadcastMismatch {
                axis,
                lhs: a.clone(),
                rhs: b.clone(),
            }),
        })
        .collect()
}

fn first_difference(a: &[usize], b: &[usize]) -> usize {
    a.iter().zip(b.iter()).position(|(x, y)| x != y).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutKind;

    fn planar(dims: &[usize]) -> BlockedShape {
        BlockedShape::planar(dims, ElementType::F32)
    }

    #[test]
    fn test_prepend_with_ones() {
        assert_eq!(prepend_with_ones(&[3, 4], 6), vec![1, 1, 1, 1, 3, 4]);
        assert_eq!(prepend_with_ones(&[1, 2, 3], 3), vec![1, 2, 3]);
        assert_eq!(prepend_with_ones(&[1, 2, 3, 4, 5, 6, 7], 6).len(), 7);
    }

    #[test]
    fn test_broadcast_merge() {
        assert_eq!(broadcast_merge(&[2, 1, 3], &[4, 1]).unwrap(), vec![2, 4, 3]);
        assert_eq!(broadcast_merge(&[], &[5]).unwrap(), vec![5]);
        assert!(matches!(
            broadcast_merge(&[2, 3], &[4, 3]),
            Err(LayoutError::BroadcastMismatch { axis: 0, .. })
        ));
    }

    #[test]
    fn test_canonicalize_right_aligns_inputs() {
        let layout = ShapeLayout::canonicalize(
            &[planar(&[2, 4, 3, 5]), planar(&[3, 5])],
            &[planar(&[2, 4, 3, 5])],
        )
        .unwrap();
        assert_eq!(layout.domain, vec![2, 4, 3, 5]);
        assert_eq!(layout.inputs[1], vec![1, 1, 3, 5]);
        assert_eq!(layout.full_work_amount(), 120);
    }

    #[test]
    fn test_canonicalize_rejects_inputs_wider_than_outputs() {
        let err = ShapeLayout::canonicalize(&[planar(&[4, 8])], &[planar(&[1, 8])]).unwrap_err();
        assert!(matches!(err, LayoutError::BroadcastMismatch { axis: 0, .. }));
    }

    #[test]
    fn test_canonicalize_rejects_mixed_orders() {
        let blocked = BlockedShape::from_logical(
            &[1, 16, 4, 4],
            LayoutKind::Blocked { block: 8 },
            ElementType::F32,
        )
        .unwrap();
        let err = ShapeLayout::canonicalize(&[blocked.clone(), planar(&[4, 4])], &[blocked])
            .unwrap_err();
        assert!(matches!(err, LayoutError::IncompatibleLayouts(_)));
    }

    #[test]
    fn test_canonicalize_blocked_domain() {
        let blocked = BlockedShape::from_logical(
            &[1, 16, 4, 4],
            LayoutKind::Blocked { block: 8 },
            ElementType::F32,
        )
        .unwrap();
        let layout =
            ShapeLayout::canonicalize(&[blocked.clone(), blocked.clone()], &[blocked]).unwrap();
        assert_eq!(layout.domain, vec![1, 2, 4, 4, 8]);
    }

    #[test]
    fn test_canonicalize_rejects_mixed_precision() {
        let err = ShapeLayout::canonicalize(
            &[BlockedShape::planar(&[4], ElementType::I32)],
            &[planar(&[4])],
        )
        .unwrap_err();
        assert_eq!(err, LayoutError::MixedPrecision(ElementType::F32, ElementType::I32));
    }

    #[test]
    fn test_canonicalize_requires_operands() {
        assert_eq!(
            ShapeLayout::canonicalize(&[planar(&[4])], &[]).unwrap_err(),
            LayoutError::NoOperands("outputs")
        );
        assert_eq!(
            ShapeLayout::canonicalize(&[], &[planar(&[4])]).unwrap_err(),
            LayoutError::NoOperands("inputs")
        );
    }

    #[test]
    fn test_padded_to() {
        let layout =
            ShapeLayout::canonicalize(&[planar(&[3, 1])], &[planar(&[3, 4])]).unwrap();
        let padded = layout.padded_to(6);
        assert_eq!(padded.domain, vec![1, 1, 1, 1, 3, 4]);
        assert_eq!(padded.inputs[0], vec![1, 1, 1, 1, 3, 1]);
        assert_eq!(padded.rank(), 6);
    }
}
