//! I/O Abstraction Layer for Deterministic Simulation Testing
//!
//! TigerStyle: All external I/O goes through abstraction traits.
//!
//! The registration worker never reads the system clock or a thread-local
//! RNG directly. Retry deadlines come from a [`TimeProvider`] and backoff
//! jitter from a [`RngProvider`], so the same worker code runs against the
//! wall clock in production and against a manually advanced clock in DST.
//!
//! ```text
//!        RegistrationManager worker (same code)
//!                     │
//!          TimeProvider / RngProvider
//!                     │
//!        ┌────────────┴────────────┐
//!   WallClockTime              SimTime
//!   StdRngProvider          DeterministicRng
//! ```

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Clock the registration worker schedules retries against
///
/// `WallClockTime` in production; `SimTime` in keel-dst, where time only
/// moves when the test advances it.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    async fn sleep_ms(&self, ms: u64);

    /// Timestamp retry deadlines are expressed in
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }

    /// Sleep until the monotonic clock reaches `deadline_ms`
    ///
    /// Returns immediately when the deadline has already passed.
    async fn sleep_until_ms(&self, deadline_ms: u64) {
        let now_ms = self.monotonic_ms();
        if deadline_ms > now_ms {
            self.sleep_ms(deadline_ms - now_ms).await;
        }
    }
}

/// System clock, with deadlines measured from construction
#[derive(Debug, Clone)]
pub struct WallClockTime {
    origin: Instant,
}

impl Default for WallClockTime {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClockTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }

    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Source of randomness for backoff jitter and incarnation ids
///
/// Production uses [`StdRngProvider`]; simulation substitutes a seeded
/// stream so every jittered delay is replayable.
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    fn next_u64(&self) -> u64;

    /// Uniform in [0, 1)
    fn next_f64(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in [-1, 1), the shape jitter is applied with
    fn next_signed_unit(&self) -> f64 {
        self.next_f64() * 2.0 - 1.0
    }
}

/// OS-seeded [`StdRng`] behind a mutex
///
/// Draws happen once per failed attempt, so contention is not a concern.
#[derive(Debug)]
pub struct StdRngProvider {
    inner: Mutex<StdRng>,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fixed seed, for tests that need repeatable jitter without DST
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen()
    }

    fn next_f64(&self) -> f64 {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen()
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of the I/O providers a manager is constructed with
#[derive(Clone)]
pub struct IoContext {
    pub time: Arc<dyn TimeProvider>,
    pub rng: Arc<dyn RngProvider>,
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("time", &self.time)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Wall clock and OS-seeded randomness
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }
}

// ============================================================================
// Tests
// ============================================================================
