//! Fault injection for deterministic testing
//!
//! TigerStyle: Typed fault points, explicit trigger budgets.
//!
//! [`SimChannel`](crate::channel::SimChannel) consults the injector at three
//! points of a registration exchange. Every consultation draws from the
//! injector's own random stream, so the same seed and the same sequence of
//! channel calls produce the same faults.

use crate::rng::DeterministicRng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where in a registration exchange a fault can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Leader lookup before a send
    ActiveController,
    /// Handing the request to the transport
    SendRequest,
    /// Completing an outstanding request
    DeliverResponse,
}

/// Faults the simulated channel knows how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    /// Leader lookup returns nothing
    NoActiveController,
    /// Connection drops
    ChannelDisconnect,
    /// No answer within the RPC deadline
    ChannelTimeout,
    /// Security handshake with the leader fails
    ChannelAuthenticationFailure,
    /// Leader answers NOT_CONTROLLER
    ResponseNotController,
    /// Leader answers UNSUPPORTED_VERSION
    ResponseUnsupportedVersion,
    /// Leader answers UNKNOWN_SERVER_ERROR
    ResponseUnknownServerError,
}

impl FaultType {
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::NoActiveController => "no_active_controller",
            FaultType::ChannelDisconnect => "channel_disconnect",
            FaultType::ChannelTimeout => "channel_timeout",
            FaultType::ChannelAuthenticationFailure => "channel_authentication_failure",
            FaultType::ResponseNotController => "response_not_controller",
            FaultType::ResponseUnsupportedVersion => "response_unsupported_version",
            FaultType::ResponseUnknownServerError => "response_unknown_server_error",
        }
    }

    /// Point a fault fires at unless configured otherwise
    pub fn default_point(&self) -> FaultPoint {
        match self {
            FaultType::NoActiveController => FaultPoint::ActiveController,
            FaultType::ChannelDisconnect | FaultType::ChannelAuthenticationFailure => {
                FaultPoint::SendRequest
            }
            FaultType::ChannelTimeout
            | FaultType::ResponseNotController
            | FaultType::ResponseUnsupportedVersion
            | FaultType::ResponseUnknownServerError => FaultPoint::DeliverResponse,
        }
    }
}

/// One injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub fault_type: FaultType,
    pub point: FaultPoint,
    /// Chance of firing per consultation, in [0, 1]
    pub probability: f64,
    /// Consultations to let pass before the rule arms
    pub skip_first: u64,
    /// Stop firing after this many triggers
    pub max_triggers: Option<u64>,
}

impl FaultConfig {
    /// Rule for `fault_type` at its default point
    ///
    /// # Panics
    /// Panics if `probability` is outside [0, 1].
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "fault probability {} outside [0, 1]",
            probability
        );
        Self {
            fault_type,
            point: fault_type.default_point(),
            probability,
            skip_first: 0,
            max_triggers: None,
        }
    }

    /// Fire at `point` instead of the default
    pub fn at(mut self, point: FaultPoint) -> Self {
        self.point = point;
        self
    }

    pub fn skip_first(mut self, consultations: u64) -> Self {
        self.skip_first = consultations;
        self
    }

    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }
}

#[derive(Debug)]
struct Rule {
    config: FaultConfig,
    consulted: AtomicU64,
    triggered: AtomicU64,
}

/// Decides, per consultation, whether a fault fires
#[derive(Debug)]
pub struct FaultInjector {
    rules: Vec<Rule>,
    rng: DeterministicRng,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rules: Vec::new(),
            rng,
        }
    }

    pub fn register(&mut self, config: FaultConfig) {
        self.rules.push(Rule {
            config,
            consulted: AtomicU64::new(0),
            triggered: AtomicU64::new(0),
        });
    }

    /// First rule at `point` that fires, in registration order
    pub fn draw(&self, point: FaultPoint) -> Option<FaultType> {
        for rule in self.rules.iter().filter(|r| r.config.point == point) {
            let consulted = rule.consulted.fetch_add(1, Ordering::SeqCst);
            if consulted < rule.config.skip_first {
                continue;
            }
            let triggered = rule.triggered.load(Ordering::SeqCst);
            if rule.config.max_triggers.is_some_and(|max| triggered >= max) {
                continue;
            }
            if !self.rng.next_bool(rule.config.probability) {
                continue;
            }

            rule.triggered.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                fault = rule.config.fault_type.name(),
                point = ?point,
                trigger = triggered + 1,
                "Injecting fault"
            );
            return Some(rule.config.fault_type);
        }
        None
    }

    /// Times `fault_type` has fired, across all its rules
    pub fn triggers(&self, fault_type: FaultType) -> u64 {
        self.rules
            .iter()
            .filter(|r| r.config.fault_type == fault_type)
            .map(|r| r.triggered.load(Ordering::SeqCst))
            .sum()
    }

    pub fn total_triggers(&self) -> u64 {
        self.rules
            .iter()
            .map(|r| r.triggered.load(Ordering::SeqCst))
            .sum()
    }
}

/// Collects rules before the injector is shared
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Leader loss, disconnects and timeouts at `probability` each
    pub fn with_transport_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::NoActiveController, probability))
            .with_fault(FaultConfig::new(FaultType::ChannelDisconnect, probability))
            .with_fault(FaultConfig::new(FaultType::ChannelTimeout, probability))
    }

    /// Retriable error responses at `probability` each
    pub fn with_response_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::ResponseNotController, probability))
            .with_fault(FaultConfig::new(
                FaultType::ResponseUnknownServerError,
                probability,
            ))
    }

    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.faults {
            injector.register(config);
        }
        injector
    }
}
