//! Status codes reported to completion callbacks.

use std::fmt;

use serde::Serialize;

use crate::error::SnippetForgeError;
use crate::schedule::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusCode {
    Ok,
    GeneralError,
    NotImplemented,
    NetworkNotLoaded,
    ParameterMismatch,
    NotFound,
    OutOfBounds,
    Unexpected,
    RequestBusy,
    ResultNotReady,
    NotAllocated,
    InferNotStarted,
    NetworkNotRead,
    InferCancelled,
}

impl StatusCode {
    /// Total mapping from the error taxonomy.
    pub fn from_error(err: &SnippetForgeError) -> Self {
        match err {
            SnippetForgeError::NotAllocated(_) => StatusCode::NotAllocated,
            SnippetForgeError::RequestBusy => StatusCode::RequestBusy,
            SnippetForgeError::NotFound(_) => StatusCode::NotFound,
            SnippetForgeError::OutOfBounds(_) => StatusCode::OutOfBounds,
            SnippetForgeError::ParameterMismatch(_) => StatusCode::ParameterMismatch,
            SnippetForgeError::ResultNotReady => StatusCode::ResultNotReady,
            SnippetForgeError::InferNotStarted => StatusCode::InferNotStarted,
            SnippetForgeError::InferCancelled => StatusCode::InferCancelled,
            SnippetForgeError::NetworkNotLoaded(_) => StatusCode::NetworkNotLoaded,
            SnippetForgeError::NotImplemented(_) => StatusCode::NotImplemented,
            SnippetForgeError::GeneralError(_) => StatusCode::GeneralError,

            SnippetForgeError::Schedule(e) => match e {
                ScheduleError::NotImplemented(_) => StatusCode::NotImplemented,
                ScheduleError::NullBuffer { .. } => StatusCode::NotAllocated,
                ScheduleError::OperandCount { .. } => StatusCode::ParameterMismatch,
                _ => StatusCode::GeneralError,
            },
            SnippetForgeError::Kernel(_)
            | SnippetForgeError::Layout(_)
            | SnippetForgeError::Codegen(_)
            | SnippetForgeError::Subgraph(_) => StatusCode::GeneralError,

            SnippetForgeError::Config(_) | SnippetForgeError::InvalidConfiguration(_) => {
                StatusCode::ParameterMismatch
            }

            SnippetForgeError::InternalError(_)
            | SnippetForgeError::LockPoisoned(_)
            | SnippetForgeError::Unexpected(_) => StatusCode::Unexpected,
        }
    }

    pub fn from_result<T>(result: &Result<T, SnippetForgeError>) -> Self {
        match result {
            Ok(_) => StatusCode::Ok,
            Err(e) => Self::from_error(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::Ok
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::GeneralError => "GENERAL_ERROR",
            StatusCode::NotImplemented => "NOT_IMPLEMENTED",
            StatusCode::NetworkNotLoaded => "NETWORK_NOT_LOADED",
            StatusCode::ParameterMismatch => "PARAMETER_MISMATCH",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::OutOfBounds => "OUT_OF_BOUNDS",
            StatusCode::Unexpected => "UNEXPECTED",
            StatusCode::RequestBusy => "REQUEST_BUSY",
            StatusCode::ResultNotReady => "RESULT_NOT_READY",
            StatusCode::NotAllocated => "NOT_ALLOCATED",
            StatusCode::InferNotStarted => "INFER_NOT_STARTED",
            StatusCode::NetworkNotRead => "NETWORK_NOT_READ",
            StatusCode::InferCancelled => "INFER_CANCELLED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
