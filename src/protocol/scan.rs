//! `prov-scan` endpoint messages

use serde::{Deserialize, Serialize};

use crate::core::types::{ScanState, WifiNetwork};

/// Requests accepted on the scan endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum ScanRequest {
    /// Start a background Wi-Fi scan
    Start,

    /// Query scan progress
    Status,

    /// Read a page of results
    Results(ResultsParams),
}

/// Page selector for scan results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsParams {
    #[serde(default)]
    pub start_index: usize,
    pub count: usize,
}

/// Response for `start` and `status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanStatusResponse {
    pub status: String,
    pub state: ScanState,
    pub result_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `results`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanResultsResponse {
    pub status: String,
    pub networks: Vec<WifiNetwork>,
}

impl ScanStatusResponse {
    pub fn ok(state: ScanState, result_count: usize, error: Option<String>) -> Self {
        Self {
            status: "ok".to_string(),
            state,
            result_count,
            error,
        }
    }
}

impl ScanResultsResponse {
    pub fn ok(networks: Vec<WifiNetwork>) -> Self {
        Self {
            status: "ok".to_string(),
            networks,
        }
    }
}
