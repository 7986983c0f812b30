//! Manually advanced clock
//!
//! TigerStyle: Time is an input. Nothing here reads the system clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Millisecond timestamp every simulation starts at (2024-01-01T00:00:00Z)
pub const SIM_CLOCK_START_MS: u64 = 1_704_067_200_000;

/// Shared simulated clock
///
/// Time only moves when the test calls [`advance_ms`](Self::advance_ms).
/// Sleepers on any thread are woken on every advance and re-check their
/// deadline.
#[derive(Debug, Clone)]
pub struct SimClock {
    current_time_ms: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl SimClock {
    /// Clock reading `ms`
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    /// Move time forward and wake every sleeper
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether `deadline_ms` has been reached
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }

    /// Park until the clock reaches `deadline_ms`
    pub async fn sleep_until_ms(&self, deadline_ms: u64) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            // Register before checking so an advance in between is not lost
            notified.as_mut().enable();
            if self.is_past_ms(deadline_ms) {
                return;
            }
            notified.await;
        }
    }

    /// Park for `ms` of simulated time
    pub async fn sleep_ms(&self, ms: u64) {
        let deadline_ms = self.now_ms().saturating_add(ms);
        self.sleep_until_ms(deadline_ms).await;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::from_millis(SIM_CLOCK_START_MS)
    }
}
