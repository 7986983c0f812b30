//! Metrics collection for Keel
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Recording functions are always available; without the `otel` feature they
//! compile to no-ops.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::Counter;
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static REGISTRATION_RPCS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("keel")
        .u64_counter(METRIC_NAME_REGISTRATION_RPCS_TOTAL)
        .with_description("Total controller registration RPCs completed")
        .init()
});

#[cfg(feature = "otel")]
static REGISTRATION_TRANSITIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("keel")
        .u64_counter(METRIC_NAME_REGISTRATION_TRANSITIONS_TOTAL)
        .with_description("Controller registration belief transitions")
        .init()
});

/// Record a completed registration RPC
///
/// # Arguments
/// * `outcome` - "success", "transport_failure", "unsupported_version",
///   "application_error" or "no_leader"
#[cfg(feature = "otel")]
pub fn record_registration_rpc(outcome: &str) {
    REGISTRATION_RPCS_COUNTER.add(1, &[KeyValue::new("outcome", outcome.to_string())]);
}

/// Record a change of the registered belief
#[cfg(feature = "otel")]
pub fn record_registration_transition(registered: bool) {
    REGISTRATION_TRANSITIONS_COUNTER.add(1, &[KeyValue::new("registered", registered)]);
}

#[cfg(not(feature = "otel"))]
pub fn record_registration_rpc(_outcome: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_registration_transition(_registered: bool) {}
