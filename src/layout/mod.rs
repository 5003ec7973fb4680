//! Operand layouts and the canonical execution-domain shape.

pub mod blocked;
pub mod canonical;
pub mod desc;

use thiserror::Error;

pub use blocked::{div_up, rnd_up, supported_layouts, BlockedShape, ElementType, LayoutKind};
pub use canonical::{broadcast_merge, prepend_with_ones, ShapeLayout};
pub use desc::{row_major_strides, TensorDesc};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("subgraph has no {0}")]
    NoOperands(&'static str),
    #[error("zero-sized dimension in shape {0:?}")]
    ZeroDim(Vec<usize>),
    #[error("shapes {lhs:?} and {rhs:?} are not broadcast compatible at axis {axis}")]
    BroadcastMismatch {
        axis: usize,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("incompatible layouts: {0}")]
    IncompatibleLayouts(String),
    #[error("mixed element types: {0} vs {1}")]
    MixedPrecision(ElementType, ElementType),
    #[error("unsupported block size {0}")]
    InvalidBlockSize(usize),
}

pub type LayoutResult<T> = Result<T, LayoutError>;
