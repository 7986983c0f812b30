//! Controller identity types
//!
//! TigerStyle: Validated identifiers, explicit limits.
//!
//! A [`ControllerIdentity`] is built once at process start. Its incarnation id
//! is fresh for every process lifetime and is what distinguishes "this
//! process is registered" from "a previous run of this controller id was".

use crate::error::{MetadataError, MetadataResult};
use keel_core::io::RngProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Maximum length of a listener name in bytes
pub const LISTENER_NAME_LENGTH_BYTES_MAX: usize = 255;

/// Maximum length of a feature name in bytes
pub const FEATURE_NAME_LENGTH_BYTES_MAX: usize = 255;

/// Maximum number of listeners per controller
pub const LISTENERS_COUNT_MAX: usize = 64;

// =============================================================================
// ControllerId
// =============================================================================

/// Node id of a controller in the quorum
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(i32);

impl ControllerId {
    /// Create a new ControllerId
    ///
    /// # Errors
    /// Returns error if the id is negative.
    pub fn new(id: i32) -> MetadataResult<Self> {
        if id < 0 {
            return Err(MetadataError::InvalidControllerId {
                id,
                reason: "controller id cannot be negative".into(),
            });
        }
        Ok(Self(id))
    }

    /// Raw id value
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// IncarnationId
// =============================================================================

/// Per-process-lifetime identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncarnationId(Uuid);

impl IncarnationId {
    /// Generate a fresh random incarnation
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Generate an incarnation from an injected RNG (for DST)
    pub fn generate_with_rng(rng: &dyn RngProvider) -> Self {
        let high = rng.next_u64().to_be_bytes();
        let low = rng.next_u64().to_be_bytes();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&high);
        bytes[8..].copy_from_slice(&low);
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for IncarnationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Security protocol spoken on a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    /// Wire id of the protocol
    pub fn id(&self) -> i16 {
        match self {
            SecurityProtocol::Plaintext => 0,
            SecurityProtocol::Ssl => 1,
            SecurityProtocol::SaslPlaintext => 2,
            SecurityProtocol::SaslSsl => 3,
        }
    }
}

/// A network endpoint a controller accepts connections on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub security_protocol: SecurityProtocol,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16, security_protocol: SecurityProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            security_protocol,
        }
    }

    fn validate(&self, name: &str) -> MetadataResult<()> {
        if self.host.is_empty() {
            return Err(MetadataError::invalid_listener(name, "host cannot be empty"));
        }
        if self.port == 0 {
            return Err(MetadataError::invalid_listener(name, "port cannot be zero"));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({:?})", self.host, self.port, self.security_protocol)
    }
}

// =============================================================================
// Feature ranges
// =============================================================================

/// Inclusive range of feature levels a controller can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    min: u16,
    max: u16,
}

impl VersionRange {
    /// Create a range, rejecting `min > max`
    pub fn new(feature: &str, min: u16, max: u16) -> MetadataResult<Self> {
        if min > max {
            return Err(MetadataError::InvalidVersionRange {
                feature: feature.to_string(),
                min,
                max,
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Check whether `level` falls inside the range
    pub fn contains(&self, level: u16) -> bool {
        self.min <= level && level <= self.max
    }
}

// =============================================================================
// ControllerIdentity
// =============================================================================

/// Everything a controller advertises about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerIdentity {
    controller_id: ControllerId,
    incarnation_id: IncarnationId,
    zk_migration_ready: bool,
    listeners: BTreeMap<String, Endpoint>,
    supported_features: BTreeMap<String, VersionRange>,
}

impl ControllerIdentity {
    /// Start building an identity with a freshly generated incarnation
    pub fn builder(controller_id: ControllerId) -> ControllerIdentityBuilder {
        ControllerIdentityBuilder::new(controller_id, IncarnationId::generate())
    }

    /// Start building an identity with an explicit incarnation
    pub fn builder_with_incarnation(
        controller_id: ControllerId,
        incarnation_id: IncarnationId,
    ) -> ControllerIdentityBuilder {
        ControllerIdentityBuilder::new(controller_id, incarnation_id)
    }

    pub fn controller_id(&self) -> ControllerId {
        self.controller_id
    }

    pub fn incarnation_id(&self) -> IncarnationId {
        self.incarnation_id
    }

    pub fn zk_migration_ready(&self) -> bool {
        self.zk_migration_ready
    }

    pub fn listeners(&self) -> &BTreeMap<String, Endpoint> {
        &self.listeners
    }

    pub fn supported_features(&self) -> &BTreeMap<String, VersionRange> {
        &self.supported_features
    }
}

/// Builder for [`ControllerIdentity`]
#[derive(Debug)]
pub struct ControllerIdentityBuilder {
    controller_id: ControllerId,
    incarnation_id: IncarnationId,
    zk_migration_ready: bool,
    listeners: Vec<(String, Endpoint)>,
    supported_features: Vec<(String, u16, u16)>,
}

impl ControllerIdentityBuilder {
    fn new(controller_id: ControllerId, incarnation_id: IncarnationId) -> Self {
        Self {
            controller_id,
            incarnation_id,
            zk_migration_ready: false,
            listeners: Vec::new(),
            supported_features: Vec::new(),
        }
    }

    /// Add a listener
    pub fn listener(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.listeners.push((name.into(), endpoint));
        self
    }

    /// Add a supported feature range
    pub fn feature(mut self, name: impl Into<String>, min: u16, max: u16) -> Self {
        self.supported_features.push((name.into(), min, max));
        self
    }

    /// Mark the controller as ready for migration from ZooKeeper
    pub fn zk_migration_ready(mut self, ready: bool) -> Self {
        self.zk_migration_ready = ready;
        self
    }

    /// Validate and build the identity
    pub fn build(self) -> MetadataResult<ControllerIdentity> {
        if self.listeners.len() > LISTENERS_COUNT_MAX {
            return Err(MetadataError::invalid_listener(
                "*",
                format!(
                    "{} listeners exceeds limit {}",
                    self.listeners.len(),
                    LISTENERS_COUNT_MAX
                ),
            ));
        }

        let mut listeners = BTreeMap::new();
        for (name, endpoint) in self.listeners {
            if name.is_empty() || name.len() > LISTENER_NAME_LENGTH_BYTES_MAX {
                return Err(MetadataError::invalid_listener(
                    name,
                    "name must be 1-255 bytes",
                ));
            }
            endpoint.validate(&name)?;
            if listeners.contains_key(&name) {
                return Err(MetadataError::DuplicateListener { name });
            }
            listeners.insert(name, endpoint);
        }

        let mut supported_features = BTreeMap::new();
        for (name, min, max) in self.supported_features {
            if name.is_empty() || name.len() > FEATURE_NAME_LENGTH_BYTES_MAX {
                return Err(MetadataError::InvalidFeatureName {
                    name,
                    reason: "name must be 1-255 bytes".into(),
                });
            }
            let range = VersionRange::new(&name, min, max)?;
            supported_features.insert(name, range);
        }

        Ok(ControllerIdentity {
            controller_id: self.controller_id,
            incarnation_id: self.incarnation_id,
            zk_migration_ready: self.zk_migration_ready,
            listeners,
            supported_features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::io::StdRngProvider;

    fn controller(id: i32) -> ControllerId {
        ControllerId::new(id).unwrap()
    }

    #[test]
    fn test_controller_id_validation() {
        assert!(ControllerId::new(0).is_ok());
        assert!(ControllerId::new(3000).is_ok());
        assert!(matches!(
            ControllerId::new(-1),
            Err(MetadataError::InvalidControllerId { id: -1, .. })
        ));
    }

    #[test]
    fn test_incarnation_ids_are_unique() {
        assert_ne!(IncarnationId::generate(), IncarnationId::generate());
    }

    #[test]
    fn test_incarnation_with_rng_is_reproducible() {
        let a = IncarnationId::generate_with_rng(&StdRngProvider::with_seed(7));
        let b = IncarnationId::generate_with_rng(&StdRngProvider::with_seed(7));
        assert_eq!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_identity_builder() {
        let identity = ControllerIdentity::builder(controller(1))
            .listener(
                "CONTROLLER",
                Endpoint::new("localhost", 9093, SecurityProtocol::Plaintext),
            )
            .feature("metadata.version", 1, 20)
            .build()
            .unwrap();

        assert_eq!(identity.controller_id(), controller(1));
        assert_eq!(identity.listeners().len(), 1);
        assert!(identity.supported_features()["metadata.version"].contains(15));
        assert!(!identity.zk_migration_ready());
    }

    #[test]
    fn test_identity_rejects_duplicate_listener() {
        let endpoint = Endpoint::new("localhost", 9093, SecurityProtocol::Plaintext);
        let result = ControllerIdentity::builder(controller(1))
            .listener("CONTROLLER", endpoint.clone())
            .listener("CONTROLLER", endpoint)
            .build();
        assert!(matches!(
            result,
            Err(MetadataError::DuplicateListener { .. })
        ));
    }

    #[test]
    fn test_identity_rejects_bad_endpoint() {
        let result = ControllerIdentity::builder(controller(1))
            .listener("CONTROLLER", Endpoint::new("", 9093, SecurityProtocol::Ssl))
            .build();
        assert!(matches!(result, Err(MetadataError::InvalidListener { .. })));

        let result = ControllerIdentity::builder(controller(1))
            .listener("CONTROLLER", Endpoint::new("host", 0, SecurityProtocol::Ssl))
            .build();
        assert!(matches!(result, Err(MetadataError::InvalidListener { .. })));
    }

    #[test]
    fn test_identity_rejects_inverted_range() {
        let result = ControllerIdentity::builder(controller(1))
            .feature("kraft.version", 2, 1)
            .build();
        assert!(matches!(
            result,
            Err(MetadataError::InvalidVersionRange { min: 2, max: 1, .. })
        ));
    }
}
