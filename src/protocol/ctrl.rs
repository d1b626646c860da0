//! `prov-ctrl` endpoint messages

use serde::{Deserialize, Serialize};

use crate::core::types::NetworkType;

/// Control commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum CtrlRequest {
    /// Clear a failed attempt so new credentials can be sent
    Reset(NetworkParams),

    /// Accept new credentials while keeping the session alive
    Reprov(NetworkParams),
}

/// Network type selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkParams {
    pub network: NetworkType,
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckResponse {
    pub status: String,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
