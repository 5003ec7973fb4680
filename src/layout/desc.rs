//! Tensor descriptors.

use serde::{Deserialize, Serialize};

use super::{BlockedShape, ElementType, LayoutKind, LayoutResult};

/// Logical shape, precision and memory layout of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub shape: Vec<usize>,
    pub element_type: ElementType,
    pub layout: LayoutKind,
    /// Elements skipped at the start of the buffer
    pub offset_padding: usize,
    /// Row-major element strides of the logical shape
    pub strides: Vec<usize>,
}

impl TensorDesc {
    pub fn new(shape: Vec<usize>, element_type: ElementType) -> Self {
        let strides = row_major_strides(&shape);
        TensorDesc {
            shape,
            element_type,
            layout: LayoutKind::Planar,
            offset_padding: 0,
            strides,
        }
    }

    pub fn f32(shape: &[usize]) -> Self {
        Self::new(shape.to_vec(), ElementType::F32)
    }

    pub fn with_layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_offset_padding(mut self, elements: usize) -> Self {
        self.offset_padding = elements;
        self
    }

    pub fn blocked_shape(&self) -> LayoutResult<BlockedShape> {
        BlockedShape::from_logical(&self.shape, self.layout, self.element_type)
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn element_size(&self) -> usize {
        self.element_type.size()
    }

    /// Bytes a buffer must hold: padding plus the physical (blocked) elements.
    pub fn byte_size(&self) -> LayoutResult<usize> {
        let physical = self.blocked_shape()?.physical_elements();
        Ok((self.offset_padding + physical) * self.element_size())
    }

    /// Same shape and precision; layout and padding may differ.
    pub fn is_compatible_with(&self, other: &TensorDesc) -> bool {
        self.shape == other.shape && self.element_type == other.element_type
    }
}

pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    let mut stride = 1usize;
    for (i, dim) in shape.iter().enumerate().rev() {
        strides[i] = stride;
        stride = stride.saturating_mul(*dim);
    }
    strides
}
