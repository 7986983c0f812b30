//! Registration state owned by the event handler
//!
//! TigerStyle: Single writer. Every method here runs on the event handler
//! thread once the manager is started, or under the lifecycle lock before.

use crate::attempt::{AttemptController, AttemptId, RegistrationOutcome};
use crate::backoff::ExponentialBackoff;
use crate::channel::{
    ControllerChannel, ControllerRegistrationRequest, ControllerRegistrationResponse,
};
use crate::error::ChannelResult;
use crate::tracker::RegistrationTracker;
use crate::worker::Command;
use keel_core::config::RegistrationConfig;
use keel_core::io::IoContext;
use keel_core::metrics;
use keel_metadata::{
    interpret, ControllerIdentity, LoaderManifest, MetadataDelta, MetadataImage, Observation,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Supplies the current controller epoch for each attempt
pub type EpochSupplier = Arc<dyn Fn() -> i32 + Send + Sync>;

/// Point-in-time view of the manager, read through the event queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStats {
    /// Latest processed image carries our incarnation's record
    pub registered: bool,
    /// Requests dispatched and not yet completed (0 or 1)
    pub pending_rpcs: u32,
    /// Requests the controller accepted
    pub successful_rpcs: u64,
    /// Requests that failed, plus attempts with no known leader
    pub failed_rpcs: u64,
    /// A retry timer is armed
    pub retry_scheduled: bool,
    /// Waiting for metadata after an UNSUPPORTED_VERSION response
    pub suspended: bool,
    /// Failures since the last success or confirmed registration
    pub consecutive_failures: u32,
    /// Classification of the latest processed image
    pub last_observation: Option<Observation>,
}

pub(crate) struct RegistrationState {
    identity: Arc<ControllerIdentity>,
    tracker: RegistrationTracker,
    attempts: AttemptController,
    backoff: ExponentialBackoff,
    io: IoContext,
    epoch_supplier: EpochSupplier,
    channel: Option<Arc<dyn ControllerChannel>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl RegistrationState {
    pub(crate) fn new(
        identity: Arc<ControllerIdentity>,
        config: &RegistrationConfig,
        io: IoContext,
        epoch_supplier: EpochSupplier,
    ) -> Self {
        let tracker =
            RegistrationTracker::new(identity.controller_id(), identity.incarnation_id());
        Self {
            identity,
            tracker,
            attempts: AttemptController::new(),
            backoff: ExponentialBackoff::new(config.backoff.clone()),
            io,
            epoch_supplier,
            channel: None,
            commands: None,
        }
    }

    /// Attach the channel and the queue completions are posted to
    pub(crate) fn install_channel(
        &mut self,
        channel: Arc<dyn ControllerChannel>,
        commands: mpsc::UnboundedSender<Command>,
    ) {
        debug_assert!(self.channel.is_none());
        self.channel = Some(channel);
        self.commands = Some(commands);
    }

    /// Detach the channel; nothing is sent or retried afterwards
    pub(crate) fn release_channel(&mut self) {
        self.attempts.cancel_retry();
        self.channel = None;
        self.commands = None;
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub(crate) fn on_metadata_update(
        &mut self,
        delta: &MetadataDelta,
        image: &MetadataImage,
        manifest: &LoaderManifest,
    ) {
        let controller_id = self.identity.controller_id();
        let relevant = manifest.is_snapshot()
            || delta.metadata_version_change().is_some()
            || delta.touches_controller(controller_id);

        if !relevant {
            debug!(
                controller_id = %controller_id,
                last_offset = manifest.provenance().last_offset,
                "Skipping metadata update that does not affect registration"
            );
            return;
        }

        self.on_snapshot(image);
    }

    pub(crate) fn on_snapshot(&mut self, image: &MetadataImage) {
        let view = interpret(image, &self.identity);
        let observation = self.tracker.observe(&view);

        match observation {
            Observation::Unsupported { .. } => {
                self.attempts.cancel_retry();
            }
            Observation::Missing | Observation::StaleIncarnation { .. } => {
                if self.attempts.resume() {
                    info!(
                        controller_id = %self.identity.controller_id(),
                        metadata_version = %view.metadata_version,
                        "Resuming registration after metadata update"
                    );
                }
                self.maybe_send();
            }
            Observation::Confirmed => {
                self.attempts.cancel_retry();
                self.attempts.resume();
                self.backoff.reset();
            }
        }
    }

    // =========================================================================
    // RPC attempts
    // =========================================================================

    pub(crate) fn maybe_send(&mut self) {
        let controller_id = self.identity.controller_id();

        if self.attempts.in_flight() {
            debug!(controller_id = %controller_id, "Not sending registration: RPC already pending");
            return;
        }
        if self.tracker.registered() {
            debug!(controller_id = %controller_id, "Not sending registration: already registered");
            return;
        }
        if !self.tracker.supports_registration() {
            debug!(
                controller_id = %controller_id,
                "Not sending registration: metadata version does not support it"
            );
            return;
        }
        if self.attempts.suspended() {
            debug!(
                controller_id = %controller_id,
                "Not sending registration: active controller reported UNSUPPORTED_VERSION"
            );
            return;
        }
        let (Some(channel), Some(commands)) = (self.channel.clone(), self.commands.clone()) else {
            debug!(controller_id = %controller_id, "Not sending registration: not started");
            return;
        };

        // A fresh attempt supersedes any scheduled retry
        self.attempts.cancel_retry();

        let Some(target) = channel.active_controller() else {
            self.attempts.record_failure();
            metrics::record_registration_rpc("no_leader");
            warn!(
                controller_id = %controller_id,
                "No active controller known; will retry registration"
            );
            self.schedule_retry();
            return;
        };

        let epoch = (self.epoch_supplier)();
        let request = ControllerRegistrationRequest::from_identity(&self.identity, epoch);
        let attempt_id = self.attempts.begin(target.clone());

        info!(
            controller_id = %controller_id,
            incarnation_id = %self.identity.incarnation_id(),
            controller_epoch = epoch,
            target = %target,
            attempt_id = attempt_id,
            "Sending ControllerRegistrationRequest"
        );

        channel.send_request(
            &target,
            request,
            Box::new(move |result| {
                // The queue is gone once the manager has stopped
                let _ = commands.send(Command::Completion { attempt_id, result });
            }),
        );
    }

    pub(crate) fn on_response(
        &mut self,
        attempt_id: AttemptId,
        result: ChannelResult<ControllerRegistrationResponse>,
    ) {
        let controller_id = self.identity.controller_id();
        let Some(target) = self.attempts.complete(attempt_id) else {
            error!(
                controller_id = %controller_id,
                attempt_id = attempt_id,
                "Completion for unknown registration attempt"
            );
            debug_assert!(false, "completion for unknown attempt {}", attempt_id);
            return;
        };

        let outcome = RegistrationOutcome::classify(result);
        metrics::record_registration_rpc(outcome.metric_label());

        match outcome {
            RegistrationOutcome::Success => {
                self.attempts.record_success();
                self.backoff.reset();
                info!(
                    controller_id = %controller_id,
                    target = %target,
                    "ControllerRegistrationRequest succeeded; waiting for the record in the log"
                );
            }
            RegistrationOutcome::TransportFailure(e) => {
                self.attempts.record_failure();
                warn!(
                    controller_id = %controller_id,
                    target = %target,
                    error = %e,
                    "ControllerRegistrationRequest failed in transport"
                );
                self.schedule_retry();
            }
            RegistrationOutcome::UnsupportedVersion { message } => {
                self.attempts.record_failure();
                self.attempts.suspend();
                self.attempts.cancel_retry();
                warn!(
                    controller_id = %controller_id,
                    target = %target,
                    message = ?message,
                    "Active controller does not support ControllerRegistrationRequest; \
                     waiting for a metadata update"
                );
            }
            RegistrationOutcome::ApplicationError { error, message } => {
                self.attempts.record_failure();
                warn!(
                    controller_id = %controller_id,
                    target = %target,
                    error = %error,
                    message = ?message,
                    "ControllerRegistrationRequest rejected"
                );
                self.schedule_retry();
            }
        }
    }

    pub(crate) fn on_retry_timer(&mut self) {
        self.attempts.cancel_retry();
        debug!(
            controller_id = %self.identity.controller_id(),
            "Registration retry timer fired"
        );
        self.maybe_send();
    }

    /// Drop an armed retry without firing it
    pub(crate) fn cancel_retry(&mut self) {
        self.attempts.cancel_retry();
    }

    fn schedule_retry(&mut self) {
        if !self.tracker.needs_registration() || self.attempts.suspended() {
            return;
        }
        let delay_ms = self.backoff.next_delay_ms(self.io.rng.as_ref());
        let deadline_ms = self.io.time.monotonic_ms().saturating_add(delay_ms);
        self.attempts.set_retry_deadline(deadline_ms);

        info!(
            controller_id = %self.identity.controller_id(),
            delay_ms = delay_ms,
            consecutive_failures = self.backoff.consecutive_failures(),
            "Scheduled registration retry"
        );
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub(crate) fn retry_deadline_ms(&self) -> Option<u64> {
        self.attempts.retry_deadline_ms()
    }

    pub(crate) fn stats(&self) -> RegistrationStats {
        RegistrationStats {
            registered: self.tracker.registered(),
            pending_rpcs: self.attempts.pending_rpcs(),
            successful_rpcs: self.attempts.successful_rpcs(),
            failed_rpcs: self.attempts.failed_rpcs(),
            retry_scheduled: self.attempts.retry_deadline_ms().is_some(),
            suspended: self.attempts.suspended(),
            consecutive_failures: self.backoff.consecutive_failures(),
            last_observation: self.tracker.last_observation(),
        }
    }
}
