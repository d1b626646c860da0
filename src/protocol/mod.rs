//! Protocol message definitions

pub mod config;
pub mod ctrl;
pub mod jsonrpc;
pub mod scan;
pub mod session;
pub mod socket;

pub use {
    config::{ConfigRequest, ConfigStatusResponse, CredentialParams},
    ctrl::{AckResponse, CtrlRequest, NetworkParams},
    jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId},
    scan::{ResultsParams, ScanRequest, ScanResultsResponse, ScanStatusResponse},
    session::{SessionRequest, SessionResponse},
    socket::{
        CallParams, CallResponse, EndpointInfo, EndpointsResponse, EventParams,
        ServiceInfoResponse, SocketNotification, SocketRequest, SocketResponse,
    },
};
