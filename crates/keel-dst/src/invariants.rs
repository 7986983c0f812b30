//! Registration invariant verification
//!
//! Each invariant is a safety property of the registration manager checked
//! against a [`SystemState`] snapshot taken between simulation steps.
//!
//! # TigerStyle
//!
//! - Violations include detailed evidence for debugging
//! - Snapshots are taken only after every published image and completion
//!   has been drained through the event queue
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_dst::invariants::{InvariantChecker, StateRecorder};
//!
//! let checker = InvariantChecker::new().with_standard_invariants();
//! let mut recorder = StateRecorder::new();
//! let state = recorder.capture(&manager, &channel, &log).await?;
//! checker.verify_all(&state)?;
//! ```

use crate::channel::SimChannel;
use crate::metadata_log::SimMetadataLog;
use keel_controller::{RegistrationManager, RegistrationStats};
use keel_metadata::Observation;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Core Types
// =============================================================================

/// Error indicating an invariant violation
#[derive(Error, Debug, Clone)]
#[error("Invariant '{name}' violated: {message}")]
pub struct InvariantViolation {
    pub name: String,
    pub message: String,
    /// Optional evidence (e.g., the stats snapshot involved)
    pub evidence: Option<String>,
}

impl InvariantViolation {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(
        name: impl Into<String>,
        message: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            evidence: Some(evidence.into()),
        }
    }
}

impl From<InvariantViolation> for keel_core::Error {
    fn from(violation: InvariantViolation) -> Self {
        keel_core::Error::Other(anyhow::Error::new(violation))
    }
}

/// A safety property of the registration manager
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `Ok(())` if the invariant holds
    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation>;
}

/// Checks multiple invariants against system state
pub struct InvariantChecker {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantChecker {
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    pub fn with_invariant(mut self, inv: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(inv));
        self
    }

    /// Add every registration invariant
    pub fn with_standard_invariants(self) -> Self {
        self.with_invariant(SingleInFlight)
            .with_invariant(RegistrationReflectsLog)
            .with_invariant(NoRetryWhenSettled)
            .with_invariant(NoSendWhileUnsupported)
    }

    /// Verify all invariants, returning the first violation (fail-fast)
    pub fn verify_all(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        for inv in &self.invariants {
            inv.check(state)?;
        }
        Ok(())
    }

    /// Verify all invariants, collecting every violation
    pub fn verify_all_collect(&self, state: &SystemState) -> Vec<InvariantViolation> {
        self.invariants
            .iter()
            .filter_map(|inv| inv.check(state).err())
            .collect()
    }

    pub fn invariant_names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

impl fmt::Debug for InvariantChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvariantChecker")
            .field("invariants", &self.invariant_names())
            .finish()
    }
}

// =============================================================================
// System State
// =============================================================================

/// Snapshot of manager, channel and log at one point of a simulation
#[derive(Debug, Clone)]
pub struct SystemState {
    pub stats: RegistrationStats,
    /// Requests the channel holds without a completion
    pub channel_in_flight: usize,
    /// Requests sent since the previous snapshot
    pub sent_since_last: usize,
    /// Latest image carries our incarnation's record
    pub log_has_registration: bool,
    /// Latest image's metadata version supports registration
    pub log_supports_registration: bool,
    /// Supported-ness of the log when the previous snapshot was taken
    pub previously_supported: bool,
}

/// Takes [`SystemState`] snapshots, remembering what the previous one saw
#[derive(Debug, Default)]
pub struct StateRecorder {
    sent_count: usize,
    supported: Option<bool>,
}

impl StateRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the manager's stats through its event queue and pair them with
    /// the channel and log
    ///
    /// # Errors
    /// `ManagerClosed` if the manager was closed.
    pub async fn capture(
        &mut self,
        manager: &RegistrationManager,
        channel: &SimChannel,
        log: &SimMetadataLog,
    ) -> keel_core::Result<SystemState> {
        let stats = manager.stats().await?;
        let supported = log.image().metadata_version().supports_controller_registration();
        let sent_count = channel.sent_count();

        let state = SystemState {
            stats,
            channel_in_flight: channel.in_flight_count(),
            sent_since_last: sent_count.saturating_sub(self.sent_count),
            log_has_registration: log
                .has_registration(manager.controller_id(), manager.incarnation_id()),
            log_supports_registration: supported,
            previously_supported: self.supported.unwrap_or(supported),
        };

        self.sent_count = sent_count;
        self.supported = Some(supported);
        Ok(state)
    }
}

// =============================================================================
// Invariants
// =============================================================================

/// At most one registration request is outstanding, and any request the
/// channel still holds is counted by the manager
///
/// The converse does not hold: a completion may sit in the event queue
/// behind the stats read.
pub struct SingleInFlight;

impl Invariant for SingleInFlight {
    fn name(&self) -> &'static str {
        "SingleInFlight"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        if state.stats.pending_rpcs > 1 || state.channel_in_flight > 1 {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                "more than one registration request outstanding",
                format!(
                    "pending_rpcs={} channel_in_flight={}",
                    state.stats.pending_rpcs, state.channel_in_flight
                ),
            ));
        }
        if state.channel_in_flight > state.stats.pending_rpcs as usize {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                "channel holds a request the manager does not count",
                format!(
                    "pending_rpcs={} channel_in_flight={}",
                    state.stats.pending_rpcs, state.channel_in_flight
                ),
            ));
        }
        Ok(())
    }
}

/// Registered exactly when the latest image carries our incarnation's record
/// at a supporting metadata version
pub struct RegistrationReflectsLog;

impl Invariant for RegistrationReflectsLog {
    fn name(&self) -> &'static str {
        "RegistrationReflectsLog"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        let expected = state.log_has_registration && state.log_supports_registration;
        if state.stats.registered != expected {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                format!(
                    "registered={} but log says {}",
                    state.stats.registered, expected
                ),
                format!("{:?}", state.stats),
            ));
        }
        let confirmed = state.stats.last_observation == Some(Observation::Confirmed);
        if state.stats.registered != confirmed {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                "registered flag disagrees with last observation",
                format!("{:?}", state.stats),
            ));
        }
        Ok(())
    }
}

/// No retry is armed once registered or while suspended
pub struct NoRetryWhenSettled;

impl Invariant for NoRetryWhenSettled {
    fn name(&self) -> &'static str {
        "NoRetryWhenSettled"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        if state.stats.retry_scheduled && (state.stats.registered || state.stats.suspended) {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                "retry armed while registered or suspended",
                format!("{:?}", state.stats),
            ));
        }
        Ok(())
    }
}

/// Nothing is sent across a step where the log never supported registration
pub struct NoSendWhileUnsupported;

impl Invariant for NoSendWhileUnsupported {
    fn name(&self) -> &'static str {
        "NoSendWhileUnsupported"
    }

    fn check(&self, state: &SystemState) -> Result<(), InvariantViolation> {
        if state.sent_since_last > 0
            && !state.previously_supported
            && !state.log_supports_registration
        {
            return Err(InvariantViolation::with_evidence(
                self.name(),
                "registration sent while metadata version does not support it",
                format!("sent_since_last={}", state.sent_since_last),
            ));
        }
        Ok(())
    }
}
