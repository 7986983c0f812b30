//! Channel error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Transport-level failures reported by the controller channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Connection to the target dropped before a response arrived
    #[error("connection to controller {node} lost: {reason}")]
    Disconnected { node: String, reason: String },

    /// No response within the channel's deadline
    #[error("request to controller {node} timed out after {timeout_ms}ms")]
    Timeout { node: String, timeout_ms: u64 },

    /// Leader discovery has no active controller
    #[error("no active controller known")]
    NoActiveController,

    /// Security handshake with the target failed
    #[error("authentication with controller {node} failed: {reason}")]
    AuthenticationFailed { node: String, reason: String },
}

impl ChannelError {
    /// Create a disconnected error
    pub fn disconnected(node: impl ToString, reason: impl Into<String>) -> Self {
        Self::Disconnected {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(node: impl ToString, timeout_ms: u64) -> Self {
        Self::Timeout {
            node: node.to_string(),
            timeout_ms,
        }
    }

    /// Check if this error is retriable
    ///
    /// Authentication failures need operator action. The registration
    /// manager still retries them on its backoff.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::AuthenticationFailed { .. })
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
