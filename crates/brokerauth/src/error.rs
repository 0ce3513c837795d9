//! Start-up error types.
//!
//! Decisions themselves never fail: every backend collapses its internal
//! failures to a denial. The errors here only surface while the engine is
//! being assembled, and only the fatal ones stop the host from serving.

use crate::config::ConfigError;

/// Errors that abort engine construction.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The option set is invalid in a way that cannot be defaulted.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A configured backend is allowed but no factory was registered for it.
    #[error("No implementation registered for backend: {name}")]
    UnregisteredBackend {
        /// The backend name from the `backends` option.
        name: String,
    },

    /// A backend factory refused to build its backend.
    #[error("Backend register error: couldn't initialize {backend} backend: {message}")]
    BackendInit {
        /// The backend that failed.
        backend: String,
        /// Description of the failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `UnregisteredBackend` error.
    #[must_use]
    pub fn unregistered_backend(name: impl Into<String>) -> Self {
        Self::UnregisteredBackend { name: name.into() }
    }

    /// Creates a new `BackendInit` error.
    #[must_use]
    pub fn backend_init(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendInit {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the error comes from a bad option set rather than
    /// from a backend.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
