//! Keel Metadata
//!
//! The slice of cluster metadata a controller needs to track its own
//! registration.
//!
//! # Overview
//!
//! - Controller identity: id, incarnation, listeners, supported features
//! - Immutable metadata images, the deltas between them, and loader manifests
//! - The `metadata.version` feature level and the registration threshold
//! - [`interpret`]: pure extraction of registration facts from an image

pub mod error;
pub mod identity;
pub mod image;
pub mod interpreter;
pub mod record;
pub mod version;

pub use error::{MetadataError, MetadataResult};
pub use identity::{
    ControllerId, ControllerIdentity, ControllerIdentityBuilder, Endpoint, IncarnationId,
    SecurityProtocol, VersionRange,
};
pub use image::{
    ClusterImage, FeaturesImage, LoaderManifest, MetadataDelta, MetadataImage,
    MetadataProvenance,
};
pub use interpreter::{interpret, Observation, SnapshotView};
pub use record::ControllerRegistrationRecord;
pub use version::{MetadataVersion, METADATA_VERSION_FEATURE_NAME};
