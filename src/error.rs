//! Unified error handling for snippetforge
//!
//! Every public entry point returns [`ForgeResult`]. Lower layers keep their
//! own narrow error enums (layout, schedule, codegen, subgraph, config) which
//! convert into [`SnippetForgeError`] through `#[from]`. The request layer maps
//! any error onto a [`StatusCode`](crate::request::StatusCode) for callbacks.
//!
//! Categories:
//! - User errors (bad shapes, bad configuration, misuse of a request)
//! - Recoverable errors (busy request, result not ready yet)
//! - Execution errors (kernel failures, cancellation)
//! - Schedule errors (layout canonicalization and code generation)
//! - Internal errors (bugs, poisoned locks)

use std::fmt;

use crate::codegen::{CodegenError, KernelError};
use crate::layout::LayoutError;
use crate::runtime::ConfigError;
use crate::schedule::ScheduleError;
use crate::subgraph::SubgraphError;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for snippetforge
///
/// Errors are `Clone` so that a failed request can replay the same error to
/// every thread blocked in `wait()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SnippetForgeError {
    // ========== Request Errors ==========
    /// Request or tensor used before it was initialized
    #[error("Not allocated: {0}")]
    NotAllocated(String),

    /// Operation is not valid while the request is busy
    #[error("Infer request is busy")]
    RequestBusy,

    /// Named tensor, port or node does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Index or capacity limit exceeded
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Supplied tensor does not match the port it is bound to
    #[error("Parameter mismatch: {0}")]
    ParameterMismatch(String),

    /// Result queried before it was produced
    #[error("Result not ready")]
    ResultNotReady,

    /// Wait called on a request that was never started
    #[error("Infer request was not started")]
    InferNotStarted,

    /// Request was cancelled before it finished
    #[error("Infer request was cancelled")]
    InferCancelled,

    /// Owning network is gone
    #[error("Network not loaded: {0}")]
    NetworkNotLoaded(String),

    // ========== Execution Errors ==========
    /// Unclassified failure during execution
    #[error("General error: {0}")]
    GeneralError(String),

    /// No optimized implementation and no fallback
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Failure raised inside a compiled kernel
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    // ========== Schedule Errors ==========
    /// Layout canonicalization failed
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Schedule definition or dispatch failed
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Code generation failed
    #[error("Codegen error: {0}")]
    Codegen(#[from] CodegenError),

    /// Subgraph body is malformed
    #[error("Subgraph error: {0}")]
    Subgraph(#[from] SubgraphError),

    // ========== Configuration Errors ==========
    /// Configuration value rejected
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid argument supplied by the caller
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned (a worker panicked while holding it)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Error kind not recognized by the mapping layer
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl SnippetForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            SnippetForgeError::NotAllocated(_)
            | SnippetForgeError::NotFound(_)
            | SnippetForgeError::OutOfBounds(_)
            | SnippetForgeError::ParameterMismatch(_)
            | SnippetForgeError::InferNotStarted
            | SnippetForgeError::NetworkNotLoaded(_)
            | SnippetForgeError::Config(_)
            | SnippetForgeError::InvalidConfiguration(_) => ErrorCategory::User,

            SnippetForgeError::RequestBusy | SnippetForgeError::ResultNotReady => {
                ErrorCategory::Recoverable
            }

            SnippetForgeError::GeneralError(_)
            | SnippetForgeError::NotImplemented(_)
            | SnippetForgeError::Kernel(_)
            | SnippetForgeError::InferCancelled => ErrorCategory::Execution,

            SnippetForgeError::Layout(_)
            | SnippetForgeError::Schedule(_)
            | SnippetForgeError::Codegen(_)
            | SnippetForgeError::Subgraph(_) => ErrorCategory::Schedule,

            SnippetForgeError::InternalError(_)
            | SnippetForgeError::LockPoisoned(_)
            | SnippetForgeError::Unexpected(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable (temporary condition)
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, configuration or API misuse
    User,
    /// Temporary condition, retry later
    Recoverable,
    /// Failure while running kernels
    Execution,
    /// Failure while defining a schedule
    Schedule,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Execution => write!(f, "Execution"),
            ErrorCategory::Schedule => write!(f, "Schedule"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for SnippetForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SnippetForgeError::LockPoisoned(err.to_string())
    }
}

/// Result alias used across the crate's public surface
pub type ForgeResult<T> = std::result::Result<T, SnippetForgeError>;

/// Create a user-facing configuration error
///
/// # Examples
/// ```ignore
/// return Err(user_error!("num_threads must be > 0"));
/// ```
#[macro_export]
macro_rules! user_error {
    ($msg:expr) => {
        $crate::error::SnippetForgeError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SnippetForgeError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
///
/// # Examples
/// ```ignore
/// return Err(internal_error!("port {} vanished after validation", name));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::SnippetForgeError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SnippetForgeError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Wrap a foreign error as an unclassified execution failure
pub fn context<E>(err: E, msg: &str) -> SnippetForgeError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SnippetForgeError::GeneralError(format!("{}: {}", msg, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            SnippetForgeError::NotFound("x".to_string()).category(),
            ErrorCategory::User
        );
        assert_eq!(
            SnippetForgeError::RequestBusy.category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            SnippetForgeError::InferCancelled.category(),
            ErrorCategory::Execution
        );
        assert_eq!(
            SnippetForgeError::Schedule(ScheduleError::NoOperands("inputs")).category(),
            ErrorCategory::Schedule
        );
        assert_eq!(
            SnippetForgeError::LockPoisoned("x".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_predicates() {
        assert!(SnippetForgeError::RequestBusy.is_recoverable());
        assert!(!SnippetForgeError::InferCancelled.is_recoverable());

        assert!(SnippetForgeError::ParameterMismatch("p".to_string()).is_user_error());
        assert!(!SnippetForgeError::GeneralError("g".to_string()).is_user_error());

        assert!(SnippetForgeError::Unexpected("u".to_string()).is_internal_error());
        assert!(!SnippetForgeError::RequestBusy.is_internal_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SnippetForgeError::RequestBusy.to_string(),
            "Infer request is busy"
        );
        assert_eq!(
            SnippetForgeError::NotFound("input0".to_string()).to_string(),
            "Not found: input0"
        );
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = SnippetForgeError::Kernel(KernelError::Failed("tile 3".to_string()));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_macros() {
        let err = user_error!("bad");
        assert!(matches!(err, SnippetForgeError::InvalidConfiguration(_)));

        let err = user_error!("threads: {}", 0);
        assert_eq!(err.to_string(), "Invalid configuration: threads: 0");

        let err = internal_error!("bug");
        assert!(matches!(err, SnippetForgeError::InternalError(_)));
    }

    #[test]
    fn test_poison_conversion() {
        use std::sync::{Arc, Mutex};

        let lock = Arc::new(Mutex::new(0u32));
        let poisoned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: SnippetForgeError = lock.lock().unwrap_err().into();
        assert!(matches!(err, SnippetForgeError::LockPoisoned(_)));
    }

    #[test]
    fn test_context_helper() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = context(io_err, "writing profile");
        assert!(matches!(err, SnippetForgeError::GeneralError(_)));
        assert!(err.to_string().contains("writing profile"));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::User.to_string(), "User");
        assert_eq!(ErrorCategory::Execution.to_string(), "Execution");
        assert_eq!(ErrorCategory::Schedule.to_string(), "Schedule");
    }
}
