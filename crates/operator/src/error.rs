//! Error types for the operator crate.

use thiserror::Error;

/// Result type alias for operator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A controller configuration failed validation.
    #[error("invalid configuration for controller '{controller}': {reason}")]
    InvalidConfiguration { controller: String, reason: String },

    /// The backing resource definition does not exist.
    #[error("cannot find resource definition with name: {crd_name}")]
    DefinitionNotFound { crd_name: String },

    /// A controller with the same name is already registered.
    #[error("controller '{controller}' is already registered")]
    AlreadyRegistered { controller: String },

    /// The operator was shut down.
    #[error("operator has been shut down")]
    ShutDown,

    /// No resource with the given key exists.
    #[error("resource '{key}' not found")]
    ResourceNotFound { key: String },

    /// A resource with the same key already exists.
    #[error("resource '{key}' already exists")]
    AlreadyExists { key: String },

    /// The store refused a change.
    #[error("conflicting change to '{key}': {reason}")]
    Conflict { key: String, reason: String },

    /// Opening a watch failed.
    #[error("failed to watch {scope}: {reason}")]
    WatchFailed { scope: String, reason: String },

    /// Core error (configuration files, resource validation).
    #[error(transparent)]
    Core(#[from] opkit_core::Error),

    /// Reconciler error.
    #[error(transparent)]
    Reconciler(#[from] opkit_reconciler::Error),
}

impl Error {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(controller: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            controller: controller.into(),
            reason: reason.into(),
        }
    }

    /// Create a definition not found error.
    pub fn definition_not_found(crd_name: impl Into<String>) -> Self {
        Self::DefinitionNotFound {
            crd_name: crd_name.into(),
        }
    }

    /// Create an already registered error.
    pub fn already_registered(controller: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            controller: controller.into(),
        }
    }

    /// Create a resource not found error.
    pub fn resource_not_found(key: impl ToString) -> Self {
        Self::ResourceNotFound {
            key: key.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(key: impl ToString) -> Self {
        Self::AlreadyExists {
            key: key.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a watch failed error.
    pub fn watch_failed(scope: impl ToString, reason: impl Into<String>) -> Self {
        Self::WatchFailed {
            scope: scope.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a configuration error raised at registration.
    pub const fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::DefinitionNotFound { .. }
                | Self::AlreadyRegistered { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_not_found_names_crd() {
        let err = Error::definition_not_found("webpages.sample.opkit.dev");
        assert!(err.to_string().contains("webpages.sample.opkit.dev"));
        assert!(err.is_registration_error());
    }

    #[test]
    fn test_store_errors_are_not_registration_errors() {
        assert!(!Error::resource_not_found("default/web").is_registration_error());
        assert!(!Error::ShutDown.is_registration_error());
    }

    #[test]
    fn test_reconciler_error_converts() {
        let err: Error = opkit_reconciler::Error::invalid_config("bad").into();
        assert!(matches!(err, Error::Reconciler(_)));
    }
}
