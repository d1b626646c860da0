//! Error types for the network provisioning manager

use thiserror::Error;

use super::types::NetworkType;

/// Result type for manager operations
pub type ProvResult<T> = Result<T, ProvError>;

/// Result type for network stack operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Result type for scheme (transport) operations
pub type SchemeResult<T> = Result<T, SchemeError>;

/// Result type for endpoint request dispatch
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Errors returned synchronously by the provisioning manager
#[derive(Error, Debug)]
pub enum ProvError {
    #[error("Provisioning manager not initialized")]
    NotInitialized,

    #[error("Provisioning manager already initialized")]
    AlreadyInitialized,

    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Endpoint already exists: {0}")]
    AlreadyExists(String),

    #[error("Endpoint not found: {0}")]
    NotFound(String),

    #[error("Endpoint handler already registered: {0}")]
    AlreadyBound(String),

    #[error("Out of memory")]
    NoMemory,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport failure: {0}")]
    TransportFailure(#[from] SchemeError),

    #[error("Credential rejected: {0}")]
    CredentialRejected(String),

    #[error("Network stack error: {0}")]
    Network(#[from] NetworkError),
}

impl ProvError {
    pub(crate) fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

/// Errors related to the underlying network stack
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Failed to apply configuration: {0}")]
    ApplyFailed(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Network type not supported: {0}")]
    Unsupported(NetworkType),

    #[error("wpa_supplicant error: {0}")]
    WpaSupplicantError(String),
}

/// Errors related to scheme (transport) operations
#[derive(Error, Debug)]
pub enum SchemeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid scheme configuration: {0}")]
    InvalidConfig(String),

    #[error("Scheme not running")]
    NotRunning,

    #[error("Scheme already running")]
    AlreadyRunning,
}

/// Errors produced while dispatching an endpoint request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("No handler bound to endpoint: {0}")]
    Unbound(String),

    #[error("Security session not established")]
    Unauthorized,

    #[error("Malformed request: {0}")]
    InvalidRequest(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for EndpointError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<ProvError> for EndpointError {
    fn from(e: ProvError) -> Self {
        Self::Rejected(e.to_string())
    }
}
