//! Async transport adapter
//!
//! TigerStyle: Trait at the I/O seam, bounded wait per request.
//!
//! [`TransportChannel`] turns an `async` request/response transport into the
//! callback-style [`ControllerChannel`] the manager dispatches through. Each
//! request runs as a task on the supplied runtime handle, so the event
//! handler never blocks on the network.

use crate::channel::{
    ControllerChannel, ControllerNode, ControllerRegistrationRequest,
    ControllerRegistrationResponse, ResponseHandler,
};
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use keel_core::constants::REGISTRATION_RPC_TIMEOUT_MS_DEFAULT;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Sends one registration request and waits for the answer
#[async_trait]
pub trait RegistrationTransport: Send + Sync + 'static {
    async fn send_and_recv(
        &self,
        target: &ControllerNode,
        request: ControllerRegistrationRequest,
    ) -> ChannelResult<ControllerRegistrationResponse>;
}

/// Latest known active controller, updated by leader discovery
#[derive(Debug, Default)]
pub struct LeaderTracker {
    leader: RwLock<Option<ControllerNode>>,
}

impl LeaderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the known leader; `None` when there is no quorum leader
    pub fn update(&self, leader: Option<ControllerNode>) {
        let mut current = self.leader.write().unwrap_or_else(|e| e.into_inner());
        if *current != leader {
            debug!(
                previous = ?current.as_ref().map(|n| n.id),
                leader = ?leader.as_ref().map(|n| n.id),
                "Active controller changed"
            );
        }
        *current = leader;
    }

    pub fn current(&self) -> Option<ControllerNode> {
        self.leader
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// [`ControllerChannel`] backed by a [`RegistrationTransport`]
pub struct TransportChannel<T: RegistrationTransport> {
    transport: Arc<T>,
    leader: Arc<LeaderTracker>,
    handle: Handle,
    timeout_ms: u64,
}

impl<T: RegistrationTransport> TransportChannel<T> {
    pub fn new(transport: Arc<T>, leader: Arc<LeaderTracker>, handle: Handle) -> Self {
        Self {
            transport,
            leader,
            handle,
            timeout_ms: REGISTRATION_RPC_TIMEOUT_MS_DEFAULT,
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        assert!(timeout_ms > 0, "timeout must be positive");
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

/// Delivers a result to the handler exactly once
///
/// Dropped without a result (the task panicked or its runtime shut down),
/// the handler sees a disconnect so the attempt is never left pending.
struct CompletionGuard {
    handler: Option<ResponseHandler>,
    target: ControllerNode,
}

impl CompletionGuard {
    fn new(target: ControllerNode, handler: ResponseHandler) -> Self {
        Self {
            handler: Some(handler),
            target,
        }
    }

    fn complete(mut self, result: ChannelResult<ControllerRegistrationResponse>) {
        if let Some(handler) = self.handler.take() {
            handler(result);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            warn!(target = %self.target, "Registration request abandoned");
            handler(Err(ChannelError::disconnected(
                self.target.id,
                "registration request abandoned before completion",
            )));
        }
    }
}

impl<T: RegistrationTransport> ControllerChannel for TransportChannel<T> {
    fn active_controller(&self) -> Option<ControllerNode> {
        self.leader.current()
    }

    fn send_request(
        &self,
        target: &ControllerNode,
        request: ControllerRegistrationRequest,
        handler: ResponseHandler,
    ) {
        let transport = self.transport.clone();
        let guard = CompletionGuard::new(target.clone(), handler);
        let timeout_ms = self.timeout_ms;

        self.handle.spawn(async move {
            let target = guard.target.clone();
            let result = match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                transport.send_and_recv(&target, request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(target = %target, timeout_ms, "Registration request timed out");
                    Err(ChannelError::timeout(target.id, timeout_ms))
                }
            };
            guard.complete(result);
        });
    }
}
