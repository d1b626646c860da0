//! Unix socket scheme methods

use serde::{Deserialize, Serialize};

/// Requests from a socket client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum SocketRequest {
    /// Send a payload to a provisioning endpoint
    Call(CallParams),

    /// List the endpoints of the running session
    ListEndpoints,

    /// Service identity and security version
    ServiceInfo,
}

/// Parameters for `call`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallParams {
    pub endpoint: String,
    /// Hex-encoded request bytes
    pub payload: String,
}

/// Results returned to a socket client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SocketResponse {
    Call(CallResponse),
    Endpoints(EndpointsResponse),
    ServiceInfo(ServiceInfoResponse),
}

/// Response for `call`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallResponse {
    /// Hex-encoded response bytes
    pub payload: String,
}

/// Response for `list_endpoints`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointsResponse {
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointInfo {
    pub name: String,
    pub id: u16,
}

/// Response for `service_info`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInfoResponse {
    pub service_name: String,
    pub security_version: u8,
    pub key_required: bool,
}

/// Server-to-client notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum SocketNotification {
    /// Provisioning lifecycle event
    Event(EventParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventParams {
    pub event: String,
}
