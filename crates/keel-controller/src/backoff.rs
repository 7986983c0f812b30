//! Exponential backoff for registration retries
//!
//! TigerStyle: Bounded delays, explicit reset points.

use keel_core::config::BackoffConfig;
use keel_core::constants::REGISTRATION_BACKOFF_EXPONENT_MAX;
use keel_core::io::RngProvider;

/// Delay generator driven by consecutive failures
///
/// The n-th consecutive failure waits `initial_ms * multiplier^(n-1)`,
/// clamped to `max_ms`, with `jitter` applied as a symmetric fraction.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    failures: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        debug_assert!(config.validate().is_ok());
        Self {
            config,
            failures: 0,
        }
    }

    /// Delay before the next retry; counts one more failure
    pub fn next_delay_ms(&mut self, rng: &dyn RngProvider) -> u64 {
        let exponent = self.failures.min(REGISTRATION_BACKOFF_EXPONENT_MAX);
        self.failures = self.failures.saturating_add(1);

        let growth = (self.config.multiplier as u64)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        let base_ms = self
            .config
            .initial_ms
            .saturating_mul(growth)
            .min(self.config.max_ms);

        if self.config.jitter == 0.0 {
            return base_ms;
        }

        let spread = base_ms as f64 * self.config.jitter * rng.next_signed_unit();
        let delay_ms = (base_ms as f64 + spread).round().max(1.0) as u64;
        let delay_ms = delay_ms.min(self.config.max_ms);

        debug_assert!(delay_ms >= 1);
        delay_ms
    }

    /// Forget accumulated failures
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::io::StdRngProvider;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 100,
            max_ms: 120_000,
            multiplier: 2,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_until_ceiling() {
        let rng = StdRngProvider::with_seed(1);
        let mut backoff = ExponentialBackoff::new(no_jitter());

        let delays: Vec<u64> = (0..13).map(|_| backoff.next_delay_ms(&rng)).collect();
        assert_eq!(&delays[..5], &[100, 200, 400, 800, 1600]);
        // 100 * 2^11 = 204800 is past the ceiling
        assert_eq!(delays[10], 102_400);
        assert_eq!(delays[11], 120_000);
        assert_eq!(delays[12], 120_000);
        assert_eq!(backoff.consecutive_failures(), 13);
    }

    #[test]
    fn test_backoff_reset() {
        let rng = StdRngProvider::with_seed(1);
        let mut backoff = ExponentialBackoff::new(no_jitter());

        backoff.next_delay_ms(&rng);
        backoff.next_delay_ms(&rng);
        backoff.reset();

        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.next_delay_ms(&rng), 100);
    }

    #[test]
    fn test_backoff_never_overflows() {
        let rng = StdRngProvider::with_seed(1);
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            multiplier: 16,
            ..no_jitter()
        });

        for _ in 0..200 {
            assert!(backoff.next_delay_ms(&rng) <= 120_000);
        }
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let rng = StdRngProvider::with_seed(99);
        let config = BackoffConfig {
            jitter: 0.2,
            ..no_jitter()
        };

        for _ in 0..100 {
            let mut backoff = ExponentialBackoff::new(config.clone());
            let delay = backoff.next_delay_ms(&rng);
            assert!((80..=120).contains(&delay), "delay {}", delay);
        }
    }

    #[test]
    fn test_constant_backoff() {
        let rng = StdRngProvider::with_seed(1);
        let mut backoff = ExponentialBackoff::new(BackoffConfig::constant(50));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay_ms(&rng), 50);
        }
    }
}
