//! Snapshot interpretation for controller registration
//!
//! TigerStyle: Pure functions, no retained state.

use crate::identity::{ControllerIdentity, IncarnationId};
use crate::image::MetadataImage;
use crate::record::ControllerRegistrationRecord;
use crate::version::MetadataVersion;
use std::fmt;

/// Registration facts extracted from one image
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    /// Active metadata version of the image
    pub metadata_version: MetadataVersion,
    /// Whether the active version requires controller registration
    pub supports_registration: bool,
    /// Record for our controller id, whatever its incarnation
    pub matching_record: Option<&'a ControllerRegistrationRecord>,
}

/// Interpret `image` from the point of view of `identity`
pub fn interpret<'a>(image: &'a MetadataImage, identity: &ControllerIdentity) -> SnapshotView<'a> {
    let metadata_version = image.metadata_version();
    SnapshotView {
        metadata_version,
        supports_registration: metadata_version.supports_controller_registration(),
        matching_record: image.cluster().controller(identity.controller_id()),
    }
}

impl SnapshotView<'_> {
    /// Classify the view against our own incarnation
    pub fn classify(&self, incarnation_id: IncarnationId) -> Observation {
        if !self.supports_registration {
            return Observation::Unsupported {
                metadata_version: self.metadata_version,
            };
        }
        match self.matching_record {
            None => Observation::Missing,
            Some(record) if record.is_incarnation(incarnation_id) => Observation::Confirmed,
            Some(record) => Observation::StaleIncarnation {
                found: record.incarnation_id,
            },
        }
    }
}

/// What a processed image says about our registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Metadata version predates controller registration
    Unsupported { metadata_version: MetadataVersion },
    /// No record for our controller id
    Missing,
    /// Record exists but belongs to another incarnation
    StaleIncarnation { found: IncarnationId },
    /// Record matches our incarnation
    Confirmed,
}

impl Observation {
    /// Whether the observation means we are registered
    pub fn is_registered(&self) -> bool {
        matches!(self, Observation::Confirmed)
    }

    /// Whether an RPC is needed to reach the registered state
    pub fn needs_registration(&self) -> bool {
        matches!(
            self,
            Observation::Missing | Observation::StaleIncarnation { .. }
        )
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Unsupported { metadata_version } => {
                write!(f, "registration unsupported at {}", metadata_version)
            }
            Observation::Missing => write!(f, "registration not in log"),
            Observation::StaleIncarnation { found } => {
                write!(f, "registration has different incarnation {}", found)
            }
            Observation::Confirmed => write!(f, "registration persisted"),
        }
    }
}
