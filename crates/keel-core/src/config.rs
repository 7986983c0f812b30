//! Configuration for the registration manager
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Registration manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Retry backoff policy
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Prefix prepended to the event handler thread name
    #[serde(default)]
    pub thread_name_prefix: String,
}

impl RegistrationConfig {
    /// Configuration for tests: short delays, no jitter
    pub fn for_testing() -> Self {
        Self {
            backoff: BackoffConfig {
                initial_ms: 10,
                max_ms: 1_000,
                multiplier: 2,
                jitter: 0.0,
            },
            thread_name_prefix: "test-".to_string(),
        }
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the backoff policy
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Full name of the event handler thread
    pub fn thread_name(&self) -> String {
        format!("{}{}", self.thread_name_prefix, REGISTRATION_THREAD_NAME_SUFFIX)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.len() > REGISTRATION_THREAD_PREFIX_LENGTH_BYTES_MAX {
            return Err(Error::InvalidConfiguration {
                field: "thread_name_prefix".into(),
                reason: format!(
                    "{} bytes exceeds limit {}",
                    self.thread_name_prefix.len(),
                    REGISTRATION_THREAD_PREFIX_LENGTH_BYTES_MAX
                ),
            });
        }
        // Thread names must not contain interior NULs
        if self.thread_name_prefix.contains('\0') {
            return Err(Error::InvalidConfiguration {
                field: "thread_name_prefix".into(),
                reason: "must not contain NUL bytes".into(),
            });
        }
        self.backoff.validate()
    }
}

/// Exponential backoff policy for registration retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure (milliseconds)
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Ceiling for any single delay (milliseconds)
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Growth factor per consecutive failure
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    /// Fraction of each delay that is randomized, in [0, 1)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_ms() -> u64 {
    REGISTRATION_BACKOFF_INITIAL_MS_DEFAULT
}

fn default_max_ms() -> u64 {
    REGISTRATION_BACKOFF_MAX_MS_DEFAULT
}

fn default_multiplier() -> u32 {
    REGISTRATION_BACKOFF_MULTIPLIER_DEFAULT
}

fn default_jitter() -> f64 {
    REGISTRATION_BACKOFF_JITTER_DEFAULT
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffConfig {
    /// Fixed delay with no growth and no jitter
    pub fn constant(delay_ms: u64) -> Self {
        Self {
            initial_ms: delay_ms,
            max_ms: delay_ms,
            multiplier: 1,
            jitter: 0.0,
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.initial_ms == 0 {
            return Err(Error::InvalidConfiguration {
                field: "backoff.initial_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.max_ms < self.initial_ms {
            return Err(Error::InvalidConfiguration {
                field: "backoff.max_ms".into(),
                reason: format!(
                    "{} is less than initial_ms {}",
                    self.max_ms, self.initial_ms
                ),
            });
        }

        if self.max_ms > REGISTRATION_BACKOFF_MAX_MS_LIMIT {
            return Err(Error::InvalidConfiguration {
                field: "backoff.max_ms".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.max_ms, REGISTRATION_BACKOFF_MAX_MS_LIMIT
                ),
            });
        }

        if self.multiplier == 0 || self.multiplier > REGISTRATION_BACKOFF_MULTIPLIER_MAX {
            return Err(Error::InvalidConfiguration {
                field: "backoff.multiplier".into(),
                reason: format!(
                    "{} outside [1, {}]",
                    self.multiplier, REGISTRATION_BACKOFF_MULTIPLIER_MAX
                ),
            });
        }

        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::InvalidConfiguration {
                field: "backoff.jitter".into(),
                reason: format!("{} outside [0, 1)", self.jitter),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RegistrationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backoff.initial_ms, 100);
        assert_eq!(config.backoff.max_ms, 120_000);
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(RegistrationConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_thread_name() {
        let config = RegistrationConfig::default().with_thread_name_prefix("broker-1-");
        assert_eq!(
            config.thread_name(),
            "broker-1-controller-registration-manager-event-handler"
        );
    }

    #[test]
    fn test_invalid_backoff() {
        let mut backoff = BackoffConfig::default();
        backoff.initial_ms = 0;
        assert!(backoff.validate().is_err());

        let mut backoff = BackoffConfig::default();
        backoff.max_ms = backoff.initial_ms - 1;
        assert!(backoff.validate().is_err());

        let mut backoff = BackoffConfig::default();
        backoff.jitter = 1.0;
        assert!(backoff.validate().is_err());

        let mut backoff = BackoffConfig::default();
        backoff.multiplier = 0;
        assert!(backoff.validate().is_err());
    }

    #[test]
    fn test_prefix_too_long() {
        let config = RegistrationConfig::default()
            .with_thread_name_prefix("x".repeat(REGISTRATION_THREAD_PREFIX_LENGTH_BYTES_MAX + 1));
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: RegistrationConfig =
            serde_json::from_str(r#"{"backoff": {"initial_ms": 250}}"#).unwrap();
        assert_eq!(config.backoff.initial_ms, 250);
        assert_eq!(config.backoff.max_ms, REGISTRATION_BACKOFF_MAX_MS_DEFAULT);
        assert_eq!(config.thread_name_prefix, "");
        assert!(config.validate().is_ok());
    }
}
