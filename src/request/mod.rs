//! Infer requests and the tensors bound to them.
//!
//! A request is created by
//! [`CompiledNetwork::create_infer_request`](crate::runtime::CompiledNetwork::create_infer_request),
//! owns one tensor per network port plus copies of the network's variables,
//! and runs on the network's worker pool.

pub mod infer_request;
pub mod status;
pub mod table;
pub mod tensor;
pub mod types;
pub mod variable;

pub use infer_request::{Callback, InferRequest, RequestHandle};
pub use status::StatusCode;
pub use table::RequestTable;
pub use tensor::{
    BufferReadGuard, BufferWriteGuard, HostBuffer, HostTensor, RemoteTensor, Tensor, TensorKind,
};
pub use types::{RequestId, RequestState};
pub use variable::VariableState;
