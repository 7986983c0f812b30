//! TigerStyle constants for Keel
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Registration Backoff
// =============================================================================

/// Delay before the first registration retry in milliseconds
pub const REGISTRATION_BACKOFF_INITIAL_MS_DEFAULT: u64 = 100;

/// Ceiling for the registration retry delay in milliseconds (2 min)
pub const REGISTRATION_BACKOFF_MAX_MS_DEFAULT: u64 = 120 * 1000;

/// Upper bound accepted for the configured backoff ceiling (1 hour)
pub const REGISTRATION_BACKOFF_MAX_MS_LIMIT: u64 = 60 * 60 * 1000;

/// Growth factor applied per consecutive failure
pub const REGISTRATION_BACKOFF_MULTIPLIER_DEFAULT: u32 = 2;

/// Largest accepted growth factor
pub const REGISTRATION_BACKOFF_MULTIPLIER_MAX: u32 = 16;

/// Fraction of the computed delay that is randomized
pub const REGISTRATION_BACKOFF_JITTER_DEFAULT: f64 = 0.02;

/// Exponent cap; beyond this the delay is always clamped to the ceiling
pub const REGISTRATION_BACKOFF_EXPONENT_MAX: u32 = 32;

// =============================================================================
// Registration Worker
// =============================================================================

/// Suffix of the event handler thread name
pub const REGISTRATION_THREAD_NAME_SUFFIX: &str = "controller-registration-manager-event-handler";

/// Maximum length of the thread name prefix in bytes
pub const REGISTRATION_THREAD_PREFIX_LENGTH_BYTES_MAX: usize = 64;

/// Time allowed for the channel layer to answer one registration request (30 sec)
pub const REGISTRATION_RPC_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

// =============================================================================
// DST Limits
// =============================================================================

/// Maximum simulation steps before forced termination
pub const DST_STEPS_COUNT_MAX: u64 = 10_000_000;

/// Maximum simulated time in milliseconds (24 hours)
pub const DST_TIME_MS_MAX: u64 = 24 * 60 * 60 * 1000;

/// Default fault injection probability
pub const DST_FAULT_PROBABILITY_DEFAULT: f64 = 0.01;

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total registration RPCs completed (counter, labels: outcome)
pub const METRIC_NAME_REGISTRATION_RPCS_TOTAL: &str = "keel_registration_rpcs_total";

/// Metric: Registration belief transitions (counter, labels: registered)
pub const METRIC_NAME_REGISTRATION_TRANSITIONS_TOTAL: &str =
    "keel_registration_transitions_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(REGISTRATION_BACKOFF_INITIAL_MS_DEFAULT > 0);
    assert!(REGISTRATION_BACKOFF_MAX_MS_DEFAULT >= REGISTRATION_BACKOFF_INITIAL_MS_DEFAULT);
    assert!(REGISTRATION_BACKOFF_MAX_MS_LIMIT >= REGISTRATION_BACKOFF_MAX_MS_DEFAULT);
    assert!(REGISTRATION_BACKOFF_MULTIPLIER_DEFAULT >= 1);
    assert!(REGISTRATION_BACKOFF_MULTIPLIER_DEFAULT <= REGISTRATION_BACKOFF_MULTIPLIER_MAX);
    assert!(REGISTRATION_THREAD_PREFIX_LENGTH_BYTES_MAX >= 16);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_defaults() {
        assert_eq!(REGISTRATION_BACKOFF_INITIAL_MS_DEFAULT, 100);
        assert_eq!(REGISTRATION_BACKOFF_MAX_MS_DEFAULT, 120_000);
        assert!((0.0..1.0).contains(&REGISTRATION_BACKOFF_JITTER_DEFAULT));
    }

    #[test]
    fn test_limits_have_units_in_names() {
        // All time limits end in _MS_, all byte limits carry _BYTES_
        let _: u64 = REGISTRATION_BACKOFF_MAX_MS_DEFAULT;
        let _: usize = REGISTRATION_THREAD_PREFIX_LENGTH_BYTES_MAX;
    }
}
