//! Bridge between the kernel scheduler and kernel generators.
//!
//! A generator receives [`CompileArgs`] once per schedule and returns a
//! [`CompiledKernel`], or `None` when it cannot produce one for the given
//! precision. Generators are looked up by name in a
//! [`GeneratorRegistry`](crate::runtime::GeneratorRegistry).

pub mod args;
pub mod reference;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::layout::ElementType;

pub use args::{CallArgs, CompileArgs};
pub use reference::ReferenceGenerator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("kernel generator '{0}' is not registered")]
    GeneratorNotFound(String),
    #[error("invalid compile arguments: {0}")]
    InvalidArgs(String),
    #[error("cannot lower {op}: {reason}")]
    UnsupportedBody { op: String, reason: String },
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Failure raised by a compiled kernel while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("kernel expects {expected} loop indexes, got {actual}")]
    IndexRank { expected: usize, actual: usize },
    #[error("kernel expects {expected} operand pointers, got {actual}")]
    OperandCount { expected: usize, actual: usize },
    #[error("kernel failed: {0}")]
    Failed(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Signature of a compiled kernel: loop indexes plus operand pointers.
pub type KernelFn = dyn Fn(&[i64], &CallArgs) -> KernelResult<()> + Send + Sync;

/// Callable produced by a generator. Cloning shares the same code.
#[derive(Clone)]
pub struct CompiledKernel {
    name: String,
    func: Arc<KernelFn>,
}

impl CompiledKernel {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[i64], &CallArgs) -> KernelResult<()> + Send + Sync + 'static,
    {
        CompiledKernel {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn call(&self, indexes: &[i64], args: &CallArgs) -> KernelResult<()> {
        (self.func)(indexes, args)
    }
}

impl fmt::Debug for CompiledKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledKernel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Produces compiled kernels from scheduling metadata.
pub trait KernelGenerator: Send + Sync {
    /// Registry name, e.g. "reference"
    fn name(&self) -> &str;

    fn supports(&self, element_type: ElementType) -> bool;

    /// `Ok(None)` means no kernel could be produced; the scheduler keeps the
    /// schedule but `execute` will refuse to run it.
    fn generate(&self, args: &CompileArgs) -> CodegenResult<Option<CompiledKernel>>;
}
