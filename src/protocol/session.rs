//! `prov-session` endpoint messages

use serde::{Deserialize, Serialize};

/// Security handshake request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRequest {
    /// Hex-encoded SHA3-256 of the proof of possession
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// Security handshake response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub status: String,
}

impl SessionResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
