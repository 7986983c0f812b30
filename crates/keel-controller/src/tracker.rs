//! Registration belief tracking
//!
//! TigerStyle: Belief is re-derived from every processed image, never set
//! by RPC completions.

use keel_core::metrics;
use keel_metadata::{ControllerId, IncarnationId, Observation, SnapshotView};
use tracing::{debug, info};

/// Holds whether the latest processed image reflects our registration
#[derive(Debug)]
pub struct RegistrationTracker {
    controller_id: ControllerId,
    incarnation_id: IncarnationId,
    registered: bool,
    supports_registration: bool,
    last_observation: Option<Observation>,
}

impl RegistrationTracker {
    pub fn new(controller_id: ControllerId, incarnation_id: IncarnationId) -> Self {
        Self {
            controller_id,
            incarnation_id,
            registered: false,
            supports_registration: false,
            last_observation: None,
        }
    }

    /// Fold one interpreted image into the belief
    pub fn observe(&mut self, view: &SnapshotView<'_>) -> Observation {
        let observation = view.classify(self.incarnation_id);
        let was_registered = self.registered;

        self.supports_registration = view.supports_registration;
        self.registered = observation.is_registered();

        if self.last_observation == Some(observation) {
            debug!(
                controller_id = %self.controller_id,
                observation = %observation,
                "Registration observation unchanged"
            );
        } else {
            match observation {
                Observation::Unsupported { metadata_version } => info!(
                    controller_id = %self.controller_id,
                    metadata_version = %metadata_version,
                    "Controller registration not supported at this metadata version"
                ),
                Observation::Missing => info!(
                    controller_id = %self.controller_id,
                    incarnation_id = %self.incarnation_id,
                    "Registration not in log"
                ),
                Observation::StaleIncarnation { found } => info!(
                    controller_id = %self.controller_id,
                    incarnation_id = %self.incarnation_id,
                    found_incarnation = %found,
                    "Registration in log has a different incarnation"
                ),
                Observation::Confirmed => info!(
                    controller_id = %self.controller_id,
                    incarnation_id = %self.incarnation_id,
                    "Registration persisted to the metadata log"
                ),
            }
        }

        if was_registered != self.registered {
            metrics::record_registration_transition(self.registered);
        }

        self.last_observation = Some(observation);
        debug_assert_eq!(self.registered, observation == Observation::Confirmed);
        observation
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    pub fn supports_registration(&self) -> bool {
        self.supports_registration
    }

    /// Whether the manager should be trying to register
    pub fn needs_registration(&self) -> bool {
        self.supports_registration && !self.registered
    }

    pub fn last_observation(&self) -> Option<Observation> {
        self.last_observation
    }
}
