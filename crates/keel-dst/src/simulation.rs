//! Simulation harness for deterministic testing
//!
//! TigerStyle: Reproducible test execution with explicit configuration.
//!
//! The registration manager runs on its own event handler thread, so the
//! harness cannot own its scheduling. Determinism comes from the inputs
//! instead: the seed picks identities, jitter and faults; the test decides
//! when time moves and when each request completes; every assertion reads
//! state through the manager's FIFO queue.

use crate::channel::SimChannel;
use crate::clock::{SimClock, SIM_CLOCK_START_MS};
use crate::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder};
use crate::invariants::{InvariantChecker, InvariantViolation, StateRecorder, SystemState};
use crate::metadata_log::SimMetadataLog;
use crate::rng::DeterministicRng;
use crate::time::SimTime;
use keel_controller::{ControllerNode, EpochSupplier, RegistrationManager};
use keel_core::config::RegistrationConfig;
use keel_core::io::{IoContext, RngProvider, TimeProvider};
use keel_core::{DST_STEPS_COUNT_MAX, DST_TIME_MS_MAX};
use keel_metadata::{ControllerId, ControllerIdentity, IncarnationId};
use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Configuration for a simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Maximum simulation steps
    pub max_steps: u64,
    /// Maximum simulated time in milliseconds
    pub max_time_ms: u64,
}

impl SimConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_steps: DST_STEPS_COUNT_MAX,
            max_time_ms: DST_TIME_MS_MAX,
        }
    }

    /// Create config from DST_SEED environment variable or random
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var("DST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(rand::random);

        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);

        Self::new(seed)
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_max_time_ms(mut self, ms: u64) -> Self {
        self.max_time_ms = ms;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Environment provided to simulation tests
pub struct SimEnvironment {
    pub config: SimConfig,
    /// Deterministic clock
    pub clock: Arc<SimClock>,
    /// Deterministic RNG
    pub rng: Arc<DeterministicRng>,
    /// I/O context handed to managers under test
    pub io_context: IoContext,
    /// Fault injector (shared with the channel)
    pub faults: Arc<FaultInjector>,
    /// Simulated connection to the controller quorum
    pub channel: Arc<SimChannel>,
    /// Invariants checked by [`SimEnvironment::check`]
    pub invariants: Arc<InvariantChecker>,
    controller_epoch: Arc<AtomicI32>,
}

impl SimEnvironment {
    /// Independent random stream for `label`
    pub fn rng_stream(&self, label: &str) -> Arc<DeterministicRng> {
        Arc::new(self.rng.stream(label))
    }

    /// Advance simulation time
    pub fn advance_time_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
        debug_assert!(
            self.clock.now_ms() - SIM_CLOCK_START_MS <= self.config.max_time_ms,
            "simulation exceeded max_time_ms"
        );
    }

    /// Get current simulation time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn time(&self) -> &Arc<dyn TimeProvider> {
        &self.io_context.time
    }

    pub fn rng_provider(&self) -> &Arc<dyn RngProvider> {
        &self.io_context.rng
    }

    /// Controller epoch the next request will carry
    pub fn set_controller_epoch(&self, epoch: i32) {
        self.controller_epoch.store(epoch, Ordering::SeqCst);
    }

    /// Supplier reading the epoch set through [`set_controller_epoch`](Self::set_controller_epoch)
    pub fn epoch_supplier(&self) -> EpochSupplier {
        let epoch = self.controller_epoch.clone();
        Arc::new(move || epoch.load(Ordering::SeqCst))
    }

    /// Identity for `controller_id` with a seed-derived incarnation
    ///
    /// # Panics
    /// Panics if `controller_id` is negative.
    pub fn identity(&self, controller_id: i32) -> ControllerIdentity {
        let id = ControllerId::new(controller_id).expect("controller id must be non-negative");
        ControllerIdentity::builder_with_incarnation(
            id,
            IncarnationId::generate_with_rng(self.rng.as_ref()),
        )
        .feature("metadata.version", 1, 20)
        .build()
        .expect("simulation identity is valid")
    }

    /// Active controller node for `controller_id`
    pub fn node(&self, controller_id: i32) -> ControllerNode {
        let id = ControllerId::new(controller_id).expect("controller id must be non-negative");
        ControllerNode::new(id, format!("controller-{}", controller_id), 9093)
    }

    /// Manager wired to this environment's clock, RNG and epoch
    pub fn manager(
        &self,
        identity: ControllerIdentity,
        config: RegistrationConfig,
    ) -> keel_core::Result<RegistrationManager> {
        RegistrationManager::new(identity, config, self.io_context.clone(), self.epoch_supplier())
    }

    /// Start `manager` against the simulated channel
    pub fn start(&self, manager: &RegistrationManager) -> keel_core::Result<()> {
        manager.start(self.channel.clone())
    }

    /// Snapshot the system and verify every configured invariant
    pub async fn check(
        &self,
        recorder: &mut StateRecorder,
        manager: &RegistrationManager,
        log: &SimMetadataLog,
    ) -> keel_core::Result<SystemState> {
        let state = recorder.capture(manager, &self.channel, log).await?;
        if let Err(violation) = self.invariants.verify_all(&state) {
            tracing::error!(
                seed = self.config.seed,
                now_ms = self.now_ms(),
                violation = %violation,
                evidence = ?violation.evidence,
                "Invariant violated"
            );
            return Err(violation.into());
        }
        Ok(state)
    }
}

/// Main simulation harness
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
    invariant_checker: Option<InvariantChecker>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
            invariant_checker: None,
        }
    }

    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.fault_configs.push(fault);
        self
    }

    pub fn with_faults(mut self, faults: Vec<FaultConfig>) -> Self {
        self.fault_configs.extend(faults);
        self
    }

    /// Replace the default (standard) invariant set
    pub fn with_invariants(mut self, checker: InvariantChecker) -> Self {
        self.invariant_checker = Some(checker);
        self
    }

    fn build_environment(self) -> SimEnvironment {
        let rng = Arc::new(DeterministicRng::new(self.config.seed));
        let clock = Arc::new(SimClock::default());

        let mut fault_builder = FaultInjectorBuilder::new(rng.stream("faults"));
        for fault in self.fault_configs {
            fault_builder = fault_builder.with_fault(fault);
        }
        let faults = Arc::new(fault_builder.build());

        let sim_time = Arc::new(SimTime::new(clock.clone()));
        let io_context = IoContext {
            time: sim_time as Arc<dyn TimeProvider>,
            rng: Arc::new(rng.stream("io")) as Arc<dyn RngProvider>,
        };

        let channel = Arc::new(SimChannel::new(faults.clone()));
        let invariants = Arc::new(
            self.invariant_checker
                .unwrap_or_else(|| InvariantChecker::new().with_standard_invariants()),
        );

        SimEnvironment {
            config: self.config,
            clock,
            rng,
            io_context,
            faults,
            channel,
            invariants,
            controller_epoch: Arc::new(AtomicI32::new(1)),
        }
    }

    /// Run the simulation with the given test function
    pub fn run<F, Fut, T>(self, test: F) -> Result<T, SimulationError>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = Result<T, keel_core::Error>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| SimulationError::RuntimeError(e.to_string()))?;

        let seed = self.config.seed;
        let env = self.build_environment();

        runtime.block_on(async { test(env).await }).map_err(|e| {
            tracing::error!(
                seed = seed,
                error = %e,
                "Simulation failed (set DST_SEED={} to replay)",
                seed
            );
            match e {
                keel_core::Error::Other(inner) => match inner.downcast::<InvariantViolation>() {
                    Ok(violation) => SimulationError::InvariantViolation(violation),
                    Err(inner) => SimulationError::TestFailed(keel_core::Error::Other(inner)),
                },
                other => SimulationError::TestFailed(other),
            }
        })
    }
}

/// Errors that can occur during simulation
#[derive(Debug)]
pub enum SimulationError {
    /// Test function returned an error
    TestFailed(keel_core::Error),
    /// Runtime initialization failed
    RuntimeError(String),
    /// An invariant was violated
    InvariantViolation(InvariantViolation),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::TestFailed(e) => write!(f, "Test failed: {}", e),
            SimulationError::RuntimeError(msg) => write!(f, "Runtime error: {}", msg),
            SimulationError::InvariantViolation(v) => write!(f, "{}", v),
        }
    }
}

impl std::error::Error for SimulationError {}

impl From<InvariantViolation> for SimulationError {
    fn from(violation: InvariantViolation) -> Self {
        SimulationError::InvariantViolation(violation)
    }
}
