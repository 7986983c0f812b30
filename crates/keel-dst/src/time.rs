//! Simulated time provider
//!
//! TigerStyle: Explicit time control, trait-based abstraction.
//!
//! The registration worker arms its retry timer through
//! [`TimeProvider::sleep_until_ms`]. Under [`SimTime`] that sleep parks until
//! the test advances the [`SimClock`] past the deadline, so a test decides
//! exactly when each retry becomes due.

use crate::clock::SimClock;
use async_trait::async_trait;
use keel_core::io::TimeProvider;
use std::sync::Arc;

/// Simulated time provider for DST
#[derive(Clone, Debug)]
pub struct SimTime {
    clock: Arc<SimClock>,
}

impl SimTime {
    pub fn new(clock: Arc<SimClock>) -> Self {
        Self { clock }
    }

    /// Get the underlying SimClock
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }
}

#[async_trait]
impl TimeProvider for SimTime {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        self.clock.sleep_ms(ms).await;
    }

    async fn sleep_until_ms(&self, deadline_ms: u64) {
        self.clock.sleep_until_ms(deadline_ms).await;
    }
}
