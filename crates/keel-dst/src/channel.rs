//! Simulated controller channel
//!
//! TigerStyle: Requests park until the test delivers them, one at a time.
//!
//! Nothing is answered behind the test's back. A test (or the chaos driver)
//! picks when the oldest outstanding request completes and with what, or
//! lets [`SimChannel::deliver`] draw the outcome from the fault injector.

use crate::fault::{FaultInjector, FaultPoint, FaultType};
use crate::rng::DeterministicRng;
use keel_controller::{
    ApiError, ChannelError, ChannelResult, ControllerChannel, ControllerNode,
    ControllerRegistrationRequest, ControllerRegistrationResponse, ResponseHandler,
};
use keel_core::constants::REGISTRATION_RPC_TIMEOUT_MS_DEFAULT;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// A request as the channel received it
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub target: ControllerNode,
    pub request: ControllerRegistrationRequest,
    /// Name of the thread `send_request` was called on
    pub thread_name: Option<String>,
}

/// A completed request and the result handed to the manager
#[derive(Debug, Clone)]
pub struct Delivery {
    pub target: ControllerNode,
    pub request: ControllerRegistrationRequest,
    pub result: ChannelResult<ControllerRegistrationResponse>,
}

struct Parked {
    target: ControllerNode,
    request: ControllerRegistrationRequest,
    handler: ResponseHandler,
}

#[derive(Default)]
struct ChannelLog {
    sent: Vec<SentRequest>,
    parked: VecDeque<Parked>,
}

/// [`ControllerChannel`] driven step by step from the test
pub struct SimChannel {
    leader: Mutex<Option<ControllerNode>>,
    faults: Arc<FaultInjector>,
    log: Mutex<ChannelLog>,
}

impl SimChannel {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            leader: Mutex::new(None),
            faults,
            log: Mutex::new(ChannelLog::default()),
        }
    }

    /// Channel that never injects faults
    pub fn without_faults() -> Self {
        Self::new(Arc::new(FaultInjector::new(DeterministicRng::default())))
    }

    fn log(&self) -> MutexGuard<'_, ChannelLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the active controller; `None` means no known leader
    pub fn set_leader(&self, leader: Option<ControllerNode>) {
        *self.leader.lock().unwrap_or_else(|e| e.into_inner()) = leader;
    }

    pub fn leader(&self) -> Option<ControllerNode> {
        self.leader.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every request sent so far, oldest first
    pub fn sent(&self) -> Vec<SentRequest> {
        self.log().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.log().sent.len()
    }

    /// Requests sent and not yet completed
    pub fn in_flight_count(&self) -> usize {
        self.log().parked.len()
    }

    fn take_oldest(&self) -> Option<Parked> {
        self.log().parked.pop_front()
    }

    /// Complete the oldest outstanding request with `result`
    ///
    /// Returns the request that was completed, if any was outstanding.
    #[must_use = "None means no request was outstanding"]
    pub fn complete(
        &self,
        result: ChannelResult<ControllerRegistrationResponse>,
    ) -> Option<ControllerRegistrationRequest> {
        let parked = self.take_oldest()?;
        (parked.handler)(result);
        Some(parked.request)
    }

    /// Answer the oldest outstanding request with `response`
    #[must_use = "None means no request was outstanding"]
    pub fn respond(
        &self,
        response: ControllerRegistrationResponse,
    ) -> Option<ControllerRegistrationRequest> {
        self.complete(Ok(response))
    }

    /// Fail the oldest outstanding request in transport
    #[must_use = "None means no request was outstanding"]
    pub fn fail(&self, error: ChannelError) -> Option<ControllerRegistrationRequest> {
        self.complete(Err(error))
    }

    /// Complete the oldest outstanding request, letting the fault injector
    /// pick the outcome (success when no fault fires)
    pub fn deliver(&self) -> Option<Delivery> {
        let parked = self.take_oldest()?;
        let target_id = parked.target.id;

        let result = match self.faults.draw(FaultPoint::DeliverResponse) {
            Some(FaultType::ChannelTimeout) => Err(ChannelError::timeout(
                target_id,
                REGISTRATION_RPC_TIMEOUT_MS_DEFAULT,
            )),
            Some(FaultType::ChannelDisconnect) => {
                Err(ChannelError::disconnected(target_id, "injected disconnect"))
            }
            Some(FaultType::ChannelAuthenticationFailure) => {
                Err(ChannelError::AuthenticationFailed {
                    node: target_id.to_string(),
                    reason: "injected authentication failure".into(),
                })
            }
            Some(FaultType::ResponseNotController) => Ok(
                ControllerRegistrationResponse::with_error(ApiError::NotController, "injected"),
            ),
            Some(FaultType::ResponseUnsupportedVersion) => {
                Ok(ControllerRegistrationResponse::with_error(
                    ApiError::UnsupportedVersion,
                    "injected",
                ))
            }
            Some(FaultType::ResponseUnknownServerError) => {
                Ok(ControllerRegistrationResponse::with_error(
                    ApiError::UnknownServerError,
                    "injected",
                ))
            }
            Some(FaultType::NoActiveController) | None => Ok(ControllerRegistrationResponse::ok()),
        };

        (parked.handler)(result.clone());
        Some(Delivery {
            target: parked.target,
            request: parked.request,
            result,
        })
    }
}

impl ControllerChannel for SimChannel {
    fn active_controller(&self) -> Option<ControllerNode> {
        if self.faults.draw(FaultPoint::ActiveController) == Some(FaultType::NoActiveController) {
            return None;
        }
        self.leader()
    }

    fn send_request(
        &self,
        target: &ControllerNode,
        request: ControllerRegistrationRequest,
        handler: ResponseHandler,
    ) {
        self.log().sent.push(SentRequest {
            target: target.clone(),
            request: request.clone(),
            thread_name: std::thread::current().name().map(String::from),
        });

        let immediate = match self.faults.draw(FaultPoint::SendRequest) {
            Some(FaultType::ChannelDisconnect) => Some(ChannelError::disconnected(
                target.id,
                "injected disconnect on send",
            )),
            Some(FaultType::ChannelAuthenticationFailure) => {
                Some(ChannelError::AuthenticationFailed {
                    node: target.id.to_string(),
                    reason: "injected authentication failure".into(),
                })
            }
            _ => None,
        };

        match immediate {
            // Completes before send_request returns, which the contract allows
            Some(error) => handler(Err(error)),
            None => self.log().parked.push_back(Parked {
                target: target.clone(),
                request,
                handler,
            }),
        }
    }
}
