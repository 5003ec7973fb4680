//! snippetforge - CPU scheduler for fused elementwise subgraphs
//!
//! Turns a fused elementwise subgraph plus the layouts of its operands into a
//! collapsed, tiled iteration space, hands that description to a kernel
//! generator, and dispatches the compiled kernel across a rayon worker pool.
//! Networks of such subgraphs are run through asynchronous infer requests.

#![allow(clippy::too_many_arguments)] // Kernel call sites carry many operand tables
#![allow(clippy::needless_range_loop)] // Index loops mirror the dimension math
#![allow(clippy::type_complexity)] // Callback and kernel signatures

pub mod codegen;
pub mod error;
pub mod layout;
pub mod logging;
pub mod metrics;
pub mod profiling;
pub mod request;
pub mod runtime;
pub mod schedule;
pub mod subgraph;

pub use codegen::{CompiledKernel, KernelGenerator, ReferenceGenerator};
pub use error::{ErrorCategory, ForgeResult, SnippetForgeError};
pub use layout::{ElementType, LayoutKind, TensorDesc};
pub use metrics::Metrics;
pub use profiling::{ProfilingInfo, ProfilingStatus};
pub use request::{
    HostTensor, InferRequest, RemoteTensor, RequestHandle, RequestId, RequestState, StatusCode,
    Tensor, VariableState,
};
pub use runtime::{CompiledNetwork, GeneratorRegistry, NetworkBuilder, RuntimeConfig};
pub use schedule::{KernelScheduler, Schedule, SchedulerConfig};
pub use subgraph::{Op, Subgraph, SubgraphBuilder};
