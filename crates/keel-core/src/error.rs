//! Error types for Keel
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Keel error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("{component} already started")]
    AlreadyStarted { component: String },

    #[error("{component} has been closed")]
    ManagerClosed { component: String },

    #[error("failed to spawn worker thread {thread_name}: {reason}")]
    WorkerSpawnFailed { thread_name: String, reason: String },

    #[error("worker thread {thread_name} panicked")]
    WorkerPanicked { thread_name: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an already started error
    pub fn already_started(component: impl Into<String>) -> Self {
        Self::AlreadyStarted {
            component: component.into(),
        }
    }

    /// Create a closed error
    pub fn closed(component: impl Into<String>) -> Self {
        Self::ManagerClosed {
            component: component.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Lifecycle errors describe a caller mistake or a terminal state, so
    /// retrying the same call cannot succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::WorkerSpawnFailed { .. })
    }
}
