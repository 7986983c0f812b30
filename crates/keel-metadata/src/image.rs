//! Immutable metadata images and the deltas between them
//!
//! TigerStyle: Immutable snapshots, explicit change sets.
//!
//! Images are produced by the log replay machinery and handed to listeners
//! behind an `Arc`. Nothing in Keel mutates an image after publication; the
//! `with_*` methods build a new one.

use crate::identity::ControllerId;
use crate::record::ControllerRegistrationRecord;
use crate::version::{MetadataVersion, METADATA_VERSION_FEATURE_NAME};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Provenance
// =============================================================================

/// Position in the metadata log an image reflects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataProvenance {
    pub last_offset: i64,
    pub last_epoch: i32,
    pub last_contained_log_time_ms: u64,
}

impl MetadataProvenance {
    pub fn new(last_offset: i64, last_epoch: i32, last_contained_log_time_ms: u64) -> Self {
        Self {
            last_offset,
            last_epoch,
            last_contained_log_time_ms,
        }
    }
}

// =============================================================================
// Features
// =============================================================================

/// Finalized feature levels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesImage {
    metadata_version: MetadataVersion,
    finalized_levels: BTreeMap<String, u16>,
}

impl FeaturesImage {
    pub fn new(metadata_version: MetadataVersion) -> Self {
        Self {
            metadata_version,
            finalized_levels: BTreeMap::new(),
        }
    }

    /// Add a finalized level for a feature other than `metadata.version`
    pub fn with_finalized_level(mut self, feature: impl Into<String>, level: u16) -> Self {
        let feature = feature.into();
        debug_assert!(feature != METADATA_VERSION_FEATURE_NAME);
        self.finalized_levels.insert(feature, level);
        self
    }

    pub fn metadata_version(&self) -> MetadataVersion {
        self.metadata_version
    }

    /// Finalized level of `feature`, including `metadata.version`
    pub fn finalized_level(&self, feature: &str) -> Option<u16> {
        if feature == METADATA_VERSION_FEATURE_NAME {
            return Some(self.metadata_version.feature_level());
        }
        self.finalized_levels.get(feature).copied()
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// Registration records of all known controllers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterImage {
    controllers: BTreeMap<ControllerId, ControllerRegistrationRecord>,
}

impl ClusterImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a controller registration
    pub fn with_controller(mut self, record: ControllerRegistrationRecord) -> Self {
        self.controllers.insert(record.controller_id, record);
        self
    }

    /// Remove a controller registration
    pub fn without_controller(mut self, controller_id: ControllerId) -> Self {
        self.controllers.remove(&controller_id);
        self
    }

    pub fn controller(&self, controller_id: ControllerId) -> Option<&ControllerRegistrationRecord> {
        self.controllers.get(&controller_id)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &ControllerRegistrationRecord> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

// =============================================================================
// Image
// =============================================================================

/// Immutable view of cluster metadata at one log position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataImage {
    provenance: MetadataProvenance,
    features: FeaturesImage,
    cluster: ClusterImage,
}

impl MetadataImage {
    pub fn new(
        provenance: MetadataProvenance,
        features: FeaturesImage,
        cluster: ClusterImage,
    ) -> Self {
        Self {
            provenance,
            features,
            cluster,
        }
    }

    /// Image of a log with nothing in it
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn provenance(&self) -> &MetadataProvenance {
        &self.provenance
    }

    pub fn features(&self) -> &FeaturesImage {
        &self.features
    }

    pub fn cluster(&self) -> &ClusterImage {
        &self.cluster
    }

    pub fn metadata_version(&self) -> MetadataVersion {
        self.features.metadata_version()
    }
}

// =============================================================================
// Delta
// =============================================================================

/// What changed between two consecutive images
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDelta {
    metadata_version_change: Option<MetadataVersion>,
    changed_controllers: BTreeSet<ControllerId>,
}

impl MetadataDelta {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compute the delta that turns `prev` into `next`
    pub fn between(prev: &MetadataImage, next: &MetadataImage) -> Self {
        let mut delta = Self::empty();

        if prev.metadata_version() != next.metadata_version() {
            delta.metadata_version_change = Some(next.metadata_version());
        }

        for record in next.cluster().controllers() {
            if prev.cluster().controller(record.controller_id) != Some(record) {
                delta.changed_controllers.insert(record.controller_id);
            }
        }
        for record in prev.cluster().controllers() {
            if next.cluster().controller(record.controller_id).is_none() {
                delta.changed_controllers.insert(record.controller_id);
            }
        }

        delta
    }

    /// Record a metadata version change
    pub fn with_metadata_version(mut self, version: MetadataVersion) -> Self {
        self.metadata_version_change = Some(version);
        self
    }

    /// Record a change to one controller's registration
    pub fn with_controller_change(mut self, controller_id: ControllerId) -> Self {
        self.changed_controllers.insert(controller_id);
        self
    }

    /// New metadata version, if it changed
    pub fn metadata_version_change(&self) -> Option<MetadataVersion> {
        self.metadata_version_change
    }

    /// Whether the registration of `controller_id` changed
    pub fn touches_controller(&self, controller_id: ControllerId) -> bool {
        self.changed_controllers.contains(&controller_id)
    }

    pub fn is_empty(&self) -> bool {
        self.metadata_version_change.is_none() && self.changed_controllers.is_empty()
    }
}

// =============================================================================
// Loader manifest
// =============================================================================

/// How the log loader produced the image being published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderManifest {
    /// Image loaded from a full snapshot
    Snapshot { provenance: MetadataProvenance },
    /// Image produced by replaying log batches on top of the previous one
    LogDeltas {
        provenance: MetadataProvenance,
        batches_count: u32,
        elapsed_ns: u64,
    },
}

impl LoaderManifest {
    pub fn provenance(&self) -> &MetadataProvenance {
        match self {
            LoaderManifest::Snapshot { provenance } => provenance,
            LoaderManifest::LogDeltas { provenance, .. } => provenance,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, LoaderManifest::Snapshot { .. })
    }
}
