//! Metadata version (cluster-wide feature level)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the finalized feature carrying the metadata version
pub const METADATA_VERSION_FEATURE_NAME: &str = "metadata.version";

/// Active `metadata.version` feature level
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataVersion(u16);

impl MetadataVersion {
    /// Oldest level a KRaft cluster can run
    pub const MINIMUM: MetadataVersion = MetadataVersion(1);

    /// Level that introduced controller registration records
    pub const CONTROLLER_REGISTRATION: MetadataVersion = MetadataVersion(15);

    /// Create from a raw feature level
    pub const fn from_feature_level(level: u16) -> Self {
        Self(level)
    }

    pub fn feature_level(&self) -> u16 {
        self.0
    }

    /// Whether controllers must register in this version
    pub fn supports_controller_registration(&self) -> bool {
        *self >= Self::CONTROLLER_REGISTRATION
    }
}

impl Default for MetadataVersion {
    fn default() -> Self {
        Self::MINIMUM
    }
}

impl fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", METADATA_VERSION_FEATURE_NAME, self.0)
    }
}
