//! Error types for the entity framework
//!
//! One unified error enum serves the whole workspace. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.
//!
//! ## Propagation policy
//!
//! Store and resolver errors surface directly to the caller. Inside a
//! registered-function execution, preparation/analysis/user-code errors
//! are captured, a failure event is emitted, pending output registrations
//! are discarded, and the error is re-raised. Event-handler errors never
//! reach callers; the bus counts them internally.
//!
//! `StoreInconsistency` is fatal: the store degrades to read-only rather
//! than attempting recovery.

use crate::types::VersionId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for framework operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by a registered function's body
///
/// User functions report failures as plain messages; the registry wraps
/// them in [`Error::FunctionFailed`] preserving the original text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FunctionError {
    /// Human-readable failure description
    pub message: String,
}

impl FunctionError {
    /// Create a function error from a message
    pub fn new(message: impl Into<String>) -> Self {
        FunctionError {
            message: message.into(),
        }
    }
}

impl From<String> for FunctionError {
    fn from(message: String) -> Self {
        FunctionError { message }
    }
}

impl From<&str> for FunctionError {
    fn from(message: &str) -> Self {
        FunctionError {
            message: message.to_string(),
        }
    }
}

// Lets function bodies use `?` on framework results (reading inputs,
// nested execute calls) while reporting failures as plain messages.
impl From<Error> for FunctionError {
    fn from(error: Error) -> Self {
        FunctionError {
            message: error.to_string(),
        }
    }
}

/// Error types for the entity framework
#[derive(Debug, Error)]
pub enum Error {
    /// String does not satisfy the address grammar
    #[error("malformed address `{0}`")]
    MalformedAddress(String),

    /// No record or graph with the given identity
    #[error("not found: {0}")]
    NotFound(String),

    /// A graph with this root version already exists
    #[error("graph already registered at version {0}")]
    AlreadyRegistered(VersionId),

    /// Operation would break a structural invariant
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Registry has no function under this name
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    /// A function with this name is already registered
    #[error("function `{0}` is already registered")]
    DuplicateName(String),

    /// An address path cannot be walked
    #[error("path error at `{step}`: {reason}")]
    PathError {
        /// The step that failed
        step: String,
        /// Why it failed
        reason: String,
    },

    /// A runtime value does not satisfy a declared type
    #[error("type mismatch for `{name}`: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Parameter or field name
        name: String,
        /// Declared kind
        expected: String,
        /// Observed kind
        actual: String,
    },

    /// A registered function's body failed
    #[error("function `{name}` failed: {source}")]
    FunctionFailed {
        /// Function name
        name: String,
        /// The original failure
        #[source]
        source: FunctionError,
    },

    /// Internal index check failed; the store degrades to read-only
    #[error("store inconsistency: {0}")]
    StoreInconsistency(String),

    /// A sync entry point was used for an async-bodied function
    #[error("function `{0}` has an async body; use execute_async")]
    AsyncOnly(String),

    /// A subscription pattern failed to compile
    #[error("invalid subscription pattern `{0}`")]
    InvalidPattern(String),

    /// A persistence backend operation failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A decorated operation exceeded its timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A decorated operation was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Check whether this error is fatal for the store
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StoreInconsistency(_))
    }

    /// Check whether this error wraps a user-function failure
    pub fn is_function_failure(&self) -> bool {
        matches!(self, Error::FunctionFailed { .. })
    }

    /// Short machine-readable kind tag, used in failure-event metadata
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedAddress(_) => "malformed_address",
            Error::NotFound(_) => "not_found",
            Error::AlreadyRegistered(_) => "already_registered",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::UnknownFunction(_) => "unknown_function",
            Error::DuplicateName(_) => "duplicate_name",
            Error::PathError { .. } => "path_error",
            Error::TypeMismatch { .. } => "type_mismatch",
            Error::FunctionFailed { .. } => "function_failed",
            Error::StoreInconsistency(_) => "store_inconsistency",
            Error::AsyncOnly(_) => "async_only",
            Error::InvalidPattern(_) => "invalid_pattern",
            Error::Persistence(_) => "persistence",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
        }
    }
}
