//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by user controller logic.
pub type ControllerError = Box<dyn std::error::Error + Send + Sync>;

/// Reconciler error types.
///
/// Every variant raised while dispatching is treated as retryable; the
/// retry policy alone decides when to give up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Controller logic returned an error.
    #[error("controller '{operation}' failed: {reason}")]
    ControllerFailed { operation: String, reason: String },

    /// Controller logic panicked.
    #[error("controller '{operation}' panicked: {reason}")]
    ControllerPanicked { operation: String, reason: String },

    /// Controller logic did not finish in time.
    #[error("controller '{operation}' timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Persisting a finalizer or status change failed.
    #[error("facade operation '{operation}' failed: {reason}")]
    FacadeFailed { operation: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a controller failed error.
    pub fn controller_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ControllerFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a controller panicked error.
    pub fn controller_panicked(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ControllerPanicked {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a facade failed error.
    pub fn facade_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FacadeFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
