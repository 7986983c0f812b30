//! Simulated metadata log
//!
//! TigerStyle: Each append produces a new immutable image plus the delta
//! from the previous one, published to the manager in log order.

use keel_controller::{ControllerRegistrationRequest, RegistrationManager};
use keel_metadata::{
    ClusterImage, ControllerId, ControllerRegistrationRecord, FeaturesImage, IncarnationId,
    LoaderManifest, MetadataDelta, MetadataImage, MetadataProvenance, MetadataVersion,
};
use std::sync::Arc;

/// Leader epoch stamped on every appended batch
const SIM_LOG_EPOCH: i32 = 1;

/// Append-only metadata log that publishes to one registration manager
#[derive(Debug)]
pub struct SimMetadataLog {
    image: Arc<MetadataImage>,
    next_offset: i64,
    published_count: u64,
}

impl SimMetadataLog {
    /// Empty log at `metadata_version`; nothing is published yet
    pub fn new(metadata_version: MetadataVersion) -> Self {
        let image = MetadataImage::new(
            MetadataProvenance::new(-1, SIM_LOG_EPOCH, 0),
            FeaturesImage::new(metadata_version),
            ClusterImage::new(),
        );
        Self {
            image: Arc::new(image),
            next_offset: 0,
            published_count: 0,
        }
    }

    /// Latest image
    pub fn image(&self) -> Arc<MetadataImage> {
        self.image.clone()
    }

    /// Number of images handed to the manager so far
    pub fn published_count(&self) -> u64 {
        self.published_count
    }

    /// Whether the latest image carries `incarnation_id`'s record for `controller_id`
    pub fn has_registration(
        &self,
        controller_id: ControllerId,
        incarnation_id: IncarnationId,
    ) -> bool {
        self.image
            .cluster()
            .controller(controller_id)
            .is_some_and(|record| record.is_incarnation(incarnation_id))
    }

    fn next_provenance(&mut self, log_time_ms: u64) -> MetadataProvenance {
        let provenance = MetadataProvenance::new(self.next_offset, SIM_LOG_EPOCH, log_time_ms);
        self.next_offset += 1;
        provenance
    }

    /// Publish the whole current image as a snapshot load
    pub fn publish_snapshot(&mut self, manager: &RegistrationManager, log_time_ms: u64) {
        let provenance = self.next_provenance(log_time_ms);
        let next = MetadataImage::new(
            provenance,
            self.image.features().clone(),
            self.image.cluster().clone(),
        );
        let delta = MetadataDelta::between(&MetadataImage::empty(), &next);
        self.image = Arc::new(next);
        self.published_count += 1;

        manager.on_metadata_update(
            delta,
            self.image.clone(),
            LoaderManifest::Snapshot { provenance },
        );
    }

    fn append(
        &mut self,
        manager: &RegistrationManager,
        features: FeaturesImage,
        cluster: ClusterImage,
        log_time_ms: u64,
    ) -> MetadataDelta {
        let provenance = self.next_provenance(log_time_ms);
        let next = MetadataImage::new(provenance, features, cluster);
        let delta = MetadataDelta::between(&self.image, &next);
        self.image = Arc::new(next);
        self.published_count += 1;

        let manifest = LoaderManifest::LogDeltas {
            provenance,
            batches_count: 1,
            elapsed_ns: 0,
        };
        manager.on_metadata_update(delta.clone(), self.image.clone(), manifest);
        delta
    }

    /// Append a batch that changes nothing the manager cares about
    pub fn append_noop(
        &mut self,
        manager: &RegistrationManager,
        log_time_ms: u64,
    ) -> MetadataDelta {
        let features = self.image.features().clone();
        let cluster = self.image.cluster().clone();
        self.append(manager, features, cluster, log_time_ms)
    }

    /// Finalize a new `metadata.version`
    pub fn set_metadata_version(
        &mut self,
        manager: &RegistrationManager,
        version: MetadataVersion,
        log_time_ms: u64,
    ) -> MetadataDelta {
        let cluster = self.image.cluster().clone();
        self.append(manager, FeaturesImage::new(version), cluster, log_time_ms)
    }

    /// Persist the record an accepted registration request produces
    pub fn apply_registration(
        &mut self,
        manager: &RegistrationManager,
        request: &ControllerRegistrationRequest,
        log_time_ms: u64,
    ) -> MetadataDelta {
        let record = ControllerRegistrationRecord {
            controller_id: request.controller_id,
            incarnation_id: request.incarnation_id,
            zk_migration_ready: request.zk_migration_ready,
            listeners: request.listener_map(),
            supported_features: request.feature_map(),
        };
        self.put_record(manager, record, log_time_ms)
    }

    /// Write an arbitrary registration record
    pub fn put_record(
        &mut self,
        manager: &RegistrationManager,
        record: ControllerRegistrationRecord,
        log_time_ms: u64,
    ) -> MetadataDelta {
        let features = self.image.features().clone();
        let cluster = self.image.cluster().clone().with_controller(record);
        self.append(manager, features, cluster, log_time_ms)
    }

    /// Fence a controller out of the cluster image
    pub fn remove_controller(
        &mut self,
        manager: &RegistrationManager,
        controller_id: ControllerId,
        log_time_ms: u64,
    ) -> MetadataDelta {
        let features = self.image.features().clone();
        let cluster = self.image.cluster().clone().without_controller(controller_id);
        self.append(manager, features, cluster, log_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_controller::ControllerRegistrationRequest;
    use keel_core::config::RegistrationConfig;
    use keel_core::io::IoContext;
    use keel_metadata::ControllerIdentity;

    fn manager(identity: ControllerIdentity) -> RegistrationManager {
        RegistrationManager::new(
            identity,
            RegistrationConfig::for_testing(),
            IoContext::production(),
            Arc::new(|| 1),
        )
        .unwrap()
    }

    #[test]
    fn test_offsets_advance_per_publish() {
        let identity = ControllerIdentity::builder(ControllerId::new(1).unwrap())
            .build()
            .unwrap();
        let manager = manager(identity);
        let mut log = SimMetadataLog::new(MetadataVersion::CONTROLLER_REGISTRATION);

        log.publish_snapshot(&manager, 0);
        assert_eq!(log.image().provenance().last_offset, 0);

        let delta = log.append_noop(&manager, 5);
        assert!(delta.is_empty());
        assert_eq!(log.image().provenance().last_offset, 1);
        assert_eq!(log.published_count(), 2);
    }

    #[test]
    fn test_apply_registration_writes_record() {
        let identity = ControllerIdentity::builder(ControllerId::new(1).unwrap())
            .feature("metadata.version", 1, 20)
            .build()
            .unwrap();
        let controller_id = identity.controller_id();
        let incarnation_id = identity.incarnation_id();
        let request = ControllerRegistrationRequest::from_identity(&identity, 3);
        let manager = manager(identity);
        let mut log = SimMetadataLog::new(MetadataVersion::CONTROLLER_REGISTRATION);

        let delta = log.apply_registration(&manager, &request, 0);
        assert!(delta.touches_controller(controller_id));
        assert!(log.has_registration(controller_id, incarnation_id));

        let delta = log.remove_controller(&manager, controller_id, 1);
        assert!(delta.touches_controller(controller_id));
        assert!(!log.has_registration(controller_id, incarnation_id));
    }

    #[test]
    fn test_version_change_delta() {
        let identity = ControllerIdentity::builder(ControllerId::new(1).unwrap())
            .build()
            .unwrap();
        let manager = manager(identity);
        let mut log = SimMetadataLog::new(MetadataVersion::from_feature_level(14));

        let delta =
            log.set_metadata_version(&manager, MetadataVersion::CONTROLLER_REGISTRATION, 0);
        assert_eq!(
            delta.metadata_version_change(),
            Some(MetadataVersion::CONTROLLER_REGISTRATION)
        );
    }
}
