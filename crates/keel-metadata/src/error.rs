//! Metadata error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Errors raised while building identities and metadata records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Controller id outside the accepted range
    #[error("invalid controller id {id}: {reason}")]
    InvalidControllerId { id: i32, reason: String },

    /// Listener endpoint failed validation
    #[error("invalid listener {name}: {reason}")]
    InvalidListener { name: String, reason: String },

    /// Two listeners share a name
    #[error("duplicate listener {name}")]
    DuplicateListener { name: String },

    /// Feature range with min above max
    #[error("invalid version range for feature {feature}: min {min} > max {max}")]
    InvalidVersionRange { feature: String, min: u16, max: u16 },

    /// Feature name failed validation
    #[error("invalid feature name {name:?}: {reason}")]
    InvalidFeatureName { name: String, reason: String },
}

impl MetadataError {
    /// Create an invalid listener error
    pub fn invalid_listener(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidListener {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for metadata operations
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
