//! Seeded randomness for simulation
//!
//! TigerStyle: One seed per run, split into named ChaCha20 streams.
//!
//! Each consumer (fault decisions, backoff jitter, test choices) draws from
//! its own stream derived from the run seed and a label. Adding draws to one
//! stream never shifts another, so a replayed seed keeps its schedule even
//! after a test grows a new random step.

use keel_core::io::RngProvider;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Mutex, MutexGuard};

/// FNV-1a over the label, folded into the run seed
fn stream_seed(seed: u64, label: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    label
        .bytes()
        .fold(FNV_OFFSET ^ seed, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}

/// Seeded random stream shared across threads
///
/// Clones share the underlying stream; use [`stream`](Self::stream) for an
/// independent one.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    inner: Arc<Mutex<ChaCha20Rng>>,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Seed this stream was built from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent stream for `label`, a pure function of this stream's seed
    pub fn stream(&self, label: &str) -> Self {
        Self::new(stream_seed(self.seed, label))
    }

    fn lock(&self) -> MutexGuard<'_, ChaCha20Rng> {
        // A panicking test thread must not wedge the manager's worker
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn next_u64(&self) -> u64 {
        self.lock().gen()
    }

    /// Uniform in [0, 1)
    pub fn next_f64(&self) -> f64 {
        self.lock().gen()
    }

    /// True with `probability`
    pub fn next_bool(&self, probability: f64) -> bool {
        debug_assert!((0.0..=1.0).contains(&probability));
        self.lock().gen_bool(probability)
    }

    /// Uniform in [low, high)
    pub fn next_range(&self, low: u64, high: u64) -> u64 {
        assert!(low < high, "empty range {}..{}", low, high);
        self.lock().gen_range(low..high)
    }

    /// Uniform index into a collection of `len` items
    pub fn next_index(&self, len: usize) -> usize {
        assert!(len > 0, "cannot index an empty collection");
        self.lock().gen_range(0..len)
    }
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RngProvider for DeterministicRng {
    fn next_u64(&self) -> u64 {
        DeterministicRng::next_u64(self)
    }

    fn next_f64(&self) -> f64 {
        DeterministicRng::next_f64(self)
    }
}
