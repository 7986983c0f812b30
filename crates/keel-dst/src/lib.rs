//! Keel DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style simulation for the controller registration
//! manager.
//!
//! # Overview
//!
//! DST drives a real [`RegistrationManager`](keel_controller::RegistrationManager)
//! with:
//! - Deterministic time control (SimClock, SimTime)
//! - Reproducible random numbers (DeterministicRng)
//! - Fault injection (FaultInjector)
//! - A step-driven controller channel (SimChannel)
//! - A simulated metadata log publishing images and deltas (SimMetadataLog)
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_dst::{SimConfig, SimMetadataLog, Simulation, StateRecorder};
//!
//! #[test]
//! fn test_registers() {
//!     let config = SimConfig::from_env_or_random();
//!     Simulation::new(config).run(|env| async move {
//!         let manager = env.manager(env.identity(1), RegistrationConfig::for_testing())?;
//!         env.start(&manager)?;
//!         // publish images, deliver requests, advance time...
//!         Ok(())
//!     }).unwrap();
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All inputs are deterministic given the same seed
//! - Always log the seed for reproducibility
//! - Explicit fault types and probabilities

pub mod channel;
pub mod clock;
pub mod fault;
pub mod invariants;
pub mod metadata_log;
pub mod rng;
pub mod simulation;
pub mod time;

pub use channel::{Delivery, SentRequest, SimChannel};
pub use clock::{SimClock, SIM_CLOCK_START_MS};
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultPoint, FaultType};
pub use invariants::{
    Invariant, InvariantChecker, InvariantViolation, NoRetryWhenSettled, NoSendWhileUnsupported,
    RegistrationReflectsLog, SingleInFlight, StateRecorder, SystemState,
};
pub use metadata_log::SimMetadataLog;
pub use rng::DeterministicRng;
pub use simulation::{SimConfig, SimEnvironment, SimulationError, Simulation};
pub use time::SimTime;
