//! Controller registration record as persisted in the metadata log

use crate::identity::{ControllerId, ControllerIdentity, Endpoint, IncarnationId, VersionRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A controller's registration, as reflected in the cluster image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRegistrationRecord {
    pub controller_id: ControllerId,
    pub incarnation_id: IncarnationId,
    pub zk_migration_ready: bool,
    pub listeners: BTreeMap<String, Endpoint>,
    pub supported_features: BTreeMap<String, VersionRange>,
}

impl ControllerRegistrationRecord {
    /// Record that would be written for `identity`
    pub fn from_identity(identity: &ControllerIdentity) -> Self {
        Self {
            controller_id: identity.controller_id(),
            incarnation_id: identity.incarnation_id(),
            zk_migration_ready: identity.zk_migration_ready(),
            listeners: identity.listeners().clone(),
            supported_features: identity.supported_features().clone(),
        }
    }

    /// Whether this record was written by the given incarnation
    pub fn is_incarnation(&self, incarnation_id: IncarnationId) -> bool {
        self.incarnation_id == incarnation_id
    }
}
