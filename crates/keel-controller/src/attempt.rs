//! RPC attempt bookkeeping
//!
//! TigerStyle: At most one attempt in flight, explicit counters.

use crate::channel::{ApiError, ControllerNode, ControllerRegistrationResponse};
use crate::error::{ChannelError, ChannelResult};

/// Identifies one dispatched request
pub type AttemptId = u64;

/// Classified completion of a registration RPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The controller accepted the request
    Success,
    /// The request never got an answer
    TransportFailure(ChannelError),
    /// The controller cannot handle registration requests yet
    UnsupportedVersion { message: Option<String> },
    /// Any other error code
    ApplicationError {
        error: ApiError,
        message: Option<String>,
    },
}

impl RegistrationOutcome {
    pub fn classify(result: ChannelResult<ControllerRegistrationResponse>) -> Self {
        match result {
            Err(e) => RegistrationOutcome::TransportFailure(e),
            Ok(response) => match response.api_error() {
                ApiError::None => RegistrationOutcome::Success,
                ApiError::UnsupportedVersion => RegistrationOutcome::UnsupportedVersion {
                    message: response.error_message,
                },
                error => RegistrationOutcome::ApplicationError {
                    error,
                    message: response.error_message,
                },
            },
        }
    }

    /// Label used for the outcome metric
    pub fn metric_label(&self) -> &'static str {
        match self {
            RegistrationOutcome::Success => "success",
            RegistrationOutcome::TransportFailure(_) => "transport_failure",
            RegistrationOutcome::UnsupportedVersion { .. } => "unsupported_version",
            RegistrationOutcome::ApplicationError { .. } => "application_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptState {
    Idle,
    InFlight {
        attempt_id: AttemptId,
        target: ControllerNode,
    },
}

/// Attempt state, retry deadline, suspension and counters
#[derive(Debug)]
pub struct AttemptController {
    state: AttemptState,
    next_attempt_id: AttemptId,
    retry_deadline_ms: Option<u64>,
    suspended: bool,
    pending_rpcs: u32,
    successful_rpcs: u64,
    failed_rpcs: u64,
}

impl Default for AttemptController {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptController {
    pub fn new() -> Self {
        Self {
            state: AttemptState::Idle,
            next_attempt_id: 1,
            retry_deadline_ms: None,
            suspended: false,
            pending_rpcs: 0,
            successful_rpcs: 0,
            failed_rpcs: 0,
        }
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.state, AttemptState::InFlight { .. })
    }

    /// Mark a new attempt in flight
    ///
    /// # Panics
    /// Panics if an attempt is already in flight.
    pub fn begin(&mut self, target: ControllerNode) -> AttemptId {
        assert!(
            !self.in_flight(),
            "registration RPC dispatched while another is in flight"
        );
        let attempt_id = self.next_attempt_id;
        self.next_attempt_id += 1;
        self.state = AttemptState::InFlight { attempt_id, target };
        self.pending_rpcs += 1;

        debug_assert_eq!(self.pending_rpcs, 1);
        attempt_id
    }

    /// Close the in-flight attempt if `attempt_id` matches it
    ///
    /// Returns the target the attempt was sent to, or `None` for an unknown
    /// attempt (nothing is changed in that case).
    pub fn complete(&mut self, attempt_id: AttemptId) -> Option<ControllerNode> {
        match std::mem::replace(&mut self.state, AttemptState::Idle) {
            AttemptState::InFlight {
                attempt_id: current,
                target,
            } if current == attempt_id => {
                self.pending_rpcs -= 1;
                debug_assert_eq!(self.pending_rpcs, 0);
                Some(target)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn record_success(&mut self) {
        self.successful_rpcs += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed_rpcs += 1;
    }

    pub fn set_retry_deadline(&mut self, deadline_ms: u64) {
        self.retry_deadline_ms = Some(deadline_ms);
    }

    /// Drop any scheduled retry; returns whether one was armed
    pub fn cancel_retry(&mut self) -> bool {
        self.retry_deadline_ms.take().is_some()
    }

    pub fn retry_deadline_ms(&self) -> Option<u64> {
        self.retry_deadline_ms
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Lift suspension; returns whether the controller was suspended
    pub fn resume(&mut self) -> bool {
        std::mem::replace(&mut self.suspended, false)
    }

    pub fn suspended(&self) -> bool {
        self.suspended
    }

    pub fn pending_rpcs(&self) -> u32 {
        self.pending_rpcs
    }

    pub fn successful_rpcs(&self) -> u64 {
        self.successful_rpcs
    }

    pub fn failed_rpcs(&self) -> u64 {
        self.failed_rpcs
    }
}
