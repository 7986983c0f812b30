//! Keel Core
//!
//! Core types, errors, and constants shared by the Keel controller crates.
//!
//! # Overview
//!
//! Keel hosts the control-plane actors a controller process runs inside a
//! metadata-quorum cluster. This crate holds what every other crate needs:
//! the error type, explicit limits, the I/O abstraction used for
//! deterministic simulation, configuration, and telemetry setup.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `REGISTRATION_BACKOFF_MAX_MS_DEFAULT`)
//! - Assertions on preconditions and postconditions
//! - No recursion (bounded iteration only)

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod metrics;
pub mod telemetry;

pub use config::{BackoffConfig, RegistrationConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use io::{IoContext, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
