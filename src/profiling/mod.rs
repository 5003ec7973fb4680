//! Node timing and per-request profiling records.
//!
//! - [`timer`] - wall-clock timers used around node execution
//! - [`info`] - [`ProfilingInfo`] entries returned by
//!   [`InferRequest::get_profiling_info`](crate::request::InferRequest::get_profiling_info)

pub mod info;
pub mod timer;

pub use info::{ProfilingInfo, ProfilingStatus};
pub use timer::{NodeTimer, ScopedTimer};
