//! Element types, memory layout kinds and blocked shapes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LayoutError, LayoutResult};

/// Element precision of an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    F32,
    F16,
    I32,
    U8,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F16 => 2,
            ElementType::U8 => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F16 => "f16",
            ElementType::I32 => "i32",
            ElementType::U8 => "u8",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical layout of a tensor in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutKind {
    /// Row-major over the logical dims
    #[default]
    Planar,
    /// Channel axis (1) moved innermost, e.g. NHWC for a 4D tensor
    ChannelsFirst,
    /// Channel axis split into `C / block` outer and `block` inner dims
    Blocked { block: usize },
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutKind::Planar => write!(f, "planar"),
            LayoutKind::ChannelsFirst => write!(f, "channels_first"),
            LayoutKind::Blocked { block } => write!(f, "blocked{}", block),
        }
    }
}

pub fn div_up(a: usize, b: usize) -> usize {
    if b == 0 {
        return 0;
    }
    a.div_ceil(b)
}

pub fn rnd_up(a: usize, b: usize) -> usize {
    div_up(a, b) * b
}

/// Block sizes a blocked layout may use
pub const SUPPORTED_BLOCK_SIZES: [usize; 2] = [8, 16];

/// Dims in memory order plus the logical axis each of them came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedShape {
    pub dims: Vec<usize>,
    pub order: Vec<usize>,
    pub element_type: ElementType,
}

impl BlockedShape {
    pub fn planar(shape: &[usize], element_type: ElementType) -> Self {
        BlockedShape {
            dims: shape.to_vec(),
            order: (0..shape.len()).collect(),
            element_type,
        }
    }

    /// Lay out a logical shape according to `kind`.
    ///
    /// Shapes a layout cannot express (rank 1 for channels-first, a unit
    /// channel axis for blocked) stay planar.
    pub fn from_logical(
        shape: &[usize],
        kind: LayoutKind,
        element_type: ElementType,
    ) -> LayoutResult<Self> {
        let rank = shape.len();
        match kind {
            LayoutKind::ChannelsFirst if rank > 1 => {
                let mut order: Vec<usize> = (0..rank).collect();
                order.remove(1);
                order.push(1);
                let dims = order.iter().map(|&axis| shape[axis]).collect();
                Ok(BlockedShape {
                    dims,
                    order,
                    element_type,
                })
            }
            LayoutKind::Blocked { block } if rank > 1 && shape[1] > 1 => {
                if !SUPPORTED_BLOCK_SIZES.contains(&block) {
                    return Err(LayoutError::InvalidBlockSize(block));
                }
                let mut dims = shape.to_vec();
                dims[1] = div_up(shape[1], block);
                dims.push(block);
                let mut order: Vec<usize> = (0..rank).collect();
                order.push(1);
                Ok(BlockedShape {
                    dims,
                    order,
                    element_type,
                })
            }
            _ => Ok(Self::planar(shape, element_type)),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_planar(&self) -> bool {
        self.order.iter().enumerate().all(|(i, &axis)| i == axis)
    }

    /// Number of elements the physical buffer holds, padding included
    pub fn physical_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Layouts usable for a set of port shapes, most preferred first.
///
/// Channels-first needs rank 1, 2, 4 or 5, blocked needs rank 4 or 5, and
/// both require every port to share the same rank. Planar always applies.
pub fn supported_layouts(
    input_shapes: &[Vec<usize>],
    output_shapes: &[Vec<usize>],
    block: usize,
) -> Vec<LayoutKind> {
    let Some(first) = output_shapes.first() else {
        return vec![LayoutKind::Planar];
    };
    let ndims = first.len();
    let ranks_equal = input_shapes
        .iter()
        .chain(output_shapes.iter())
        .all(|s| s.len() == ndims);

    let mut kinds = Vec::with_capacity(3);
    if ranks_equal && matches!(ndims, 1 | 2 | 4 | 5) {
        kinds.push(LayoutKind::ChannelsFirst);
    }
    if ranks_equal && matches!(ndims, 4 | 5) && SUPPORTED_BLOCK_SIZES.contains(&block) {
        kinds.push(LayoutKind::Blocked { block });
    }
    kinds.push(LayoutKind::Planar);
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::F32.size(), 4);
        assert_eq!(ElementType::F16.size(), 2);
        assert_eq!(ElementType::I32.size(), 4);
        assert_eq!(ElementType::U8.size(), 1);
        assert_eq!(ElementType::F32.to_string(), "f32");
    }

    #[test]
    fn test_div_up_rnd_up() {
        assert_eq!(div_up(17, 8), 3);
        assert_eq!(div_up(16, 8), 2);
        assert_eq!(rnd_up(17, 8), 24);
        assert_eq!(div_up(5, 0), 0);
    }

    #[test]
    fn test_channels_first_moves_channel_innermost() {
        let shape = BlockedShape::from_logical(&[2, 3, 4, 5], LayoutKind::ChannelsFirst, ElementType::F32)
            .unwrap();
        assert_eq!(shape.dims, vec![2, 4, 5, 3]);
        assert_eq!(shape.order, vec![0, 2, 3, 1]);
        assert!(!shape.is_planar());
    }

    #[test]
    fn test_channels_first_rank_one_stays_planar() {
        let shape =
            BlockedShape::from_logical(&[7], LayoutKind::ChannelsFirst, ElementType::F32).unwrap();
        assert_eq!(shape.dims, vec![7]);
        assert!(shape.is_planar());
    }

    #[test]
    fn test_blocked_splits_channels() {
        let shape = BlockedShape::from_logical(
            &[1, 20, 3, 3],
            LayoutKind::Blocked { block: 8 },
            ElementType::F32,
        )
        .unwrap();
        assert_eq!(shape.dims, vec![1, 3, 3, 3, 8]);
        assert_eq!(shape.order, vec![0, 1, 2, 3, 1]);
        assert_eq!(shape.physical_elements(), 216);
    }

    #[test]
    fn test_blocked_unit_channel_stays_planar() {
        let shape = BlockedShape::from_logical(
            &[2, 1, 3, 3],
            LayoutKind::Blocked { block: 16 },
            ElementType::F32,
        )
        .unwrap();
        assert!(shape.is_planar());
        assert_eq!(shape.dims, vec![2, 1, 3, 3]);
    }

    #[test]
    fn test_blocked_rejects_odd_block() {
        let err = BlockedShape::from_logical(
            &[1, 20, 3, 3],
            LayoutKind::Blocked { block: 4 },
            ElementType::F32,
        )
        .unwrap_err();
        assert_eq!(err, LayoutError::InvalidBlockSize(4));
    }

    #[test]
    fn test_supported_layouts_priority() {
        let four_d = vec![vec![1, 16, 8, 8]];
        assert_eq!(
            supported_layouts(&four_d, &four_d, 8),
            vec![
                LayoutKind::ChannelsFirst,
                LayoutKind::Blocked { block: 8 },
                LayoutKind::Planar
            ]
        );

        let three_d = vec![vec![4, 8, 8]];
        assert_eq!(supported_layouts(&three_d, &three_d, 8), vec![LayoutKind::Planar]);

        let mixed_in = vec![vec![8, 8]];
        assert_eq!(supported_layouts(&mixed_in, &four_d, 16), vec![LayoutKind::Planar]);
    }
}
