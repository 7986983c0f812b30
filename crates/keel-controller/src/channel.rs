//! Controller channel contract and registration wire types
//!
//! TigerStyle: Explicit message types, fire-and-forget dispatch.
//!
//! The channel layer owns connections and leader discovery. The registration
//! manager only asks "who is the active controller?" and hands over a request
//! with a completion handler. The handler is called exactly once, from
//! whatever thread the channel completes on.

use crate::error::ChannelResult;
use keel_metadata::{
    ControllerId, ControllerIdentity, Endpoint, IncarnationId, SecurityProtocol, VersionRange,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Target node
// =============================================================================

/// An active controller the request can be sent to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerNode {
    pub id: ControllerId,
    pub host: String,
    pub port: u16,
}

impl ControllerNode {
    pub fn new(id: ControllerId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ControllerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.id, self.host, self.port)
    }
}

// =============================================================================
// Request
// =============================================================================

/// Listener as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestListener {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub security_protocol: i16,
}

/// Supported feature range as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFeature {
    pub name: String,
    pub min_supported_version: u16,
    pub max_supported_version: u16,
}

/// Request asking the active controller to persist our registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRegistrationRequest {
    pub controller_id: ControllerId,
    pub incarnation_id: IncarnationId,
    pub controller_epoch: i32,
    pub zk_migration_ready: bool,
    pub listeners: Vec<RequestListener>,
    pub features: Vec<RequestFeature>,
}

impl ControllerRegistrationRequest {
    /// Build the request advertising `identity` at `controller_epoch`
    pub fn from_identity(identity: &ControllerIdentity, controller_epoch: i32) -> Self {
        let listeners = identity
            .listeners()
            .iter()
            .map(|(name, endpoint)| RequestListener {
                name: name.clone(),
                host: endpoint.host.clone(),
                port: endpoint.port,
                security_protocol: endpoint.security_protocol.id(),
            })
            .collect();

        let features = identity
            .supported_features()
            .iter()
            .map(|(name, range)| RequestFeature {
                name: name.clone(),
                min_supported_version: range.min(),
                max_supported_version: range.max(),
            })
            .collect();

        Self {
            controller_id: identity.controller_id(),
            incarnation_id: identity.incarnation_id(),
            controller_epoch,
            zk_migration_ready: identity.zk_migration_ready(),
            listeners,
            features,
        }
    }

    /// Listeners keyed by name, with unknown protocol ids dropped
    pub fn listener_map(&self) -> BTreeMap<String, Endpoint> {
        self.listeners
            .iter()
            .filter_map(|l| {
                let protocol = match l.security_protocol {
                    0 => SecurityProtocol::Plaintext,
                    1 => SecurityProtocol::Ssl,
                    2 => SecurityProtocol::SaslPlaintext,
                    3 => SecurityProtocol::SaslSsl,
                    _ => return None,
                };
                Some((l.name.clone(), Endpoint::new(l.host.clone(), l.port, protocol)))
            })
            .collect()
    }

    /// Feature ranges keyed by name, with inverted ranges dropped
    pub fn feature_map(&self) -> BTreeMap<String, VersionRange> {
        self.features
            .iter()
            .filter_map(|f| {
                VersionRange::new(&f.name, f.min_supported_version, f.max_supported_version)
                    .ok()
                    .map(|range| (f.name.clone(), range))
            })
            .collect()
    }
}

// =============================================================================
// Response
// =============================================================================

/// Error codes a controller can answer a registration request with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiError {
    None,
    UnknownServerError,
    ClusterAuthorizationFailed,
    UnsupportedVersion,
    NotController,
    InvalidRequest,
    Unknown(i16),
}

impl ApiError {
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => ApiError::None,
            -1 => ApiError::UnknownServerError,
            31 => ApiError::ClusterAuthorizationFailed,
            35 => ApiError::UnsupportedVersion,
            41 => ApiError::NotController,
            42 => ApiError::InvalidRequest,
            other => ApiError::Unknown(other),
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            ApiError::None => 0,
            ApiError::UnknownServerError => -1,
            ApiError::ClusterAuthorizationFailed => 31,
            ApiError::UnsupportedVersion => 35,
            ApiError::NotController => 41,
            ApiError::InvalidRequest => 42,
            ApiError::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ApiError::None => "NONE",
            ApiError::UnknownServerError => "UNKNOWN_SERVER_ERROR",
            ApiError::ClusterAuthorizationFailed => "CLUSTER_AUTHORIZATION_FAILED",
            ApiError::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ApiError::NotController => "NOT_CONTROLLER",
            ApiError::InvalidRequest => "INVALID_REQUEST",
            ApiError::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Response to a [`ControllerRegistrationRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRegistrationResponse {
    pub error_code: i16,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub throttle_time_ms: i32,
}

impl ControllerRegistrationResponse {
    /// Successful response
    pub fn ok() -> Self {
        Self {
            error_code: ApiError::None.code(),
            error_message: None,
            throttle_time_ms: 0,
        }
    }

    /// Response carrying an application error
    pub fn with_error(error: ApiError, message: impl Into<String>) -> Self {
        Self {
            error_code: error.code(),
            error_message: Some(message.into()),
            throttle_time_ms: 0,
        }
    }

    pub fn api_error(&self) -> ApiError {
        ApiError::from_code(self.error_code)
    }
}

// =============================================================================
// Channel contract
// =============================================================================

/// Completion handler for one dispatched request
pub type ResponseHandler =
    Box<dyn FnOnce(ChannelResult<ControllerRegistrationResponse>) + Send + 'static>;

/// Connection to the controller quorum
pub trait ControllerChannel: Send + Sync {
    /// Currently known active controller, if any
    fn active_controller(&self) -> Option<ControllerNode>;

    /// Send `request` to `target` without blocking
    ///
    /// `handler` must be invoked exactly once, with the response or the
    /// transport failure. It may be invoked before this call returns.
    fn send_request(
        &self,
        target: &ControllerNode,
        request: ControllerRegistrationRequest,
        handler: ResponseHandler,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ControllerIdentity {
        ControllerIdentity::builder(ControllerId::new(3).unwrap())
            .listener(
                "CONTROLLER",
                Endpoint::new("c3.local", 9093, SecurityProtocol::SaslSsl),
            )
            .feature("metadata.version", 1, 20)
            .feature("kraft.version", 0, 1)
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_from_identity() {
        let identity = identity();
        let request = ControllerRegistrationRequest::from_identity(&identity, 7);

        assert_eq!(request.controller_id, identity.controller_id());
        assert_eq!(request.incarnation_id, identity.incarnation_id());
        assert_eq!(request.controller_epoch, 7);
        assert_eq!(request.listeners.len(), 1);
        assert_eq!(request.listeners[0].security_protocol, 3);
        assert_eq!(request.features.len(), 2);
    }

    #[test]
    fn test_request_maps_match_identity() {
        let identity = identity();
        let request = ControllerRegistrationRequest::from_identity(&identity, 1);

        assert_eq!(&request.listener_map(), identity.listeners());
        assert_eq!(&request.feature_map(), identity.supported_features());
    }

    #[test]
    fn test_api_error_codes() {
        for error in [
            ApiError::None,
            ApiError::UnknownServerError,
            ApiError::ClusterAuthorizationFailed,
            ApiError::UnsupportedVersion,
            ApiError::NotController,
            ApiError::InvalidRequest,
        ] {
            assert_eq!(ApiError::from_code(error.code()), error);
        }
        assert_eq!(ApiError::from_code(99), ApiError::Unknown(99));
        assert_eq!(ApiError::UnsupportedVersion.code(), 35);
    }

    #[test]
    fn test_response_wire_format() {
        let json = r#"{"error_code":41,"error_message":"not the leader"}"#;
        let response: ControllerRegistrationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.api_error(), ApiError::NotController);
        assert_eq!(response.throttle_time_ms, 0);

        assert_eq!(ControllerRegistrationResponse::ok().api_error(), ApiError::None);
    }
}
