//! Domain types for network provisioning

use serde::{Deserialize, Serialize};

/// Maximum length of a Thread operational dataset in TLV form
pub const THREAD_DATASET_MAX_LEN: usize = 254;

/// Maximum length of a Wi-Fi passphrase or raw PSK
pub const WIFI_PASSPHRASE_MAX_LEN: usize = 64;

/// Lifecycle phase of the provisioning manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvState {
    Uninitialized,
    Idle,
    Starting,
    Active,
    StoppingDeferred,
    Stopping,
    Deinitialized,
}

impl ProvState {
    /// True while a provisioning session exists in any form
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ProvState::Starting
                | ProvState::Active
                | ProvState::StoppingDeferred
                | ProvState::Stopping
        )
    }

    /// True when no provisioning session is in progress
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            ProvState::Uninitialized | ProvState::Idle | ProvState::Deinitialized
        )
    }
}

impl std::fmt::Display for ProvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProvState::Uninitialized => "uninitialized",
            ProvState::Idle => "idle",
            ProvState::Starting => "starting",
            ProvState::Active => "active",
            ProvState::StoppingDeferred => "stopping_deferred",
            ProvState::Stopping => "stopping",
            ProvState::Deinitialized => "deinitialized",
        };
        f.write_str(name)
    }
}

/// Network types the manager can provision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Thread,
}

impl NetworkType {
    pub const ALL: [NetworkType; 2] = [NetworkType::Wifi, NetworkType::Thread];
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Wifi => f.write_str("wifi"),
            NetworkType::Thread => f.write_str("thread"),
        }
    }
}

/// Wi-Fi station configuration received from a client
#[derive(Clone, PartialEq, Eq)]
pub struct WifiConfig {
    /// Network SSID (1..=32 bytes)
    pub ssid: String,
    /// Passphrase (at most 64 bytes), empty for open networks
    pub passphrase: String,
    /// Optional BSSID to lock onto
    pub bssid: Option<[u8; 6]>,
    /// Optional channel hint (0 = any)
    pub channel: u8,
}

impl WifiConfig {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            bssid: None,
            channel: 0,
        }
    }

    /// Check structural validity of the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ssid.is_empty() || self.ssid.len() > 32 {
            return Err(format!(
                "SSID must be 1 to 32 bytes, got {}",
                self.ssid.len()
            ));
        }

        if self.passphrase.len() > WIFI_PASSPHRASE_MAX_LEN {
            return Err(format!(
                "Passphrase must be at most {} bytes, got {}",
                WIFI_PASSPHRASE_MAX_LEN,
                self.passphrase.len()
            ));
        }

        Ok(())
    }

    /// True if the network has no passphrase
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }
}

impl std::fmt::Debug for WifiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiConfig")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("bssid", &self.bssid.map(hex::encode))
            .field("channel", &self.channel)
            .finish()
    }
}

/// Thread operational dataset in TLV encoding
#[derive(Clone, PartialEq, Eq)]
pub struct ThreadDataset {
    pub tlvs: Vec<u8>,
}

impl ThreadDataset {
    pub fn new(tlvs: Vec<u8>) -> Self {
        Self { tlvs }
    }

    /// Check that the dataset is a well-formed TLV sequence
    pub fn validate(&self) -> Result<(), String> {
        if self.tlvs.is_empty() || self.tlvs.len() > THREAD_DATASET_MAX_LEN {
            return Err(format!(
                "Dataset must be 1 to {} bytes, got {}",
                THREAD_DATASET_MAX_LEN,
                self.tlvs.len()
            ));
        }

        let mut offset = 0;
        while offset < self.tlvs.len() {
            let Some(&len) = self.tlvs.get(offset + 1) else {
                return Err(format!("Truncated TLV header at offset {}", offset));
            };
            let end = offset + 2 + len as usize;
            if end > self.tlvs.len() {
                return Err(format!("TLV at offset {} overruns dataset", offset));
            }
            offset = end;
        }

        Ok(())
    }
}

impl std::fmt::Debug for ThreadDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDataset")
            .field("len", &self.tlvs.len())
            .finish()
    }
}

/// Credentials for one network type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCredential {
    Wifi(WifiConfig),
    Thread(ThreadDataset),
}

impl NetworkCredential {
    pub fn network_type(&self) -> NetworkType {
        match self {
            NetworkCredential::Wifi(_) => NetworkType::Wifi,
            NetworkCredential::Thread(_) => NetworkType::Thread,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            NetworkCredential::Wifi(config) => config.validate(),
            NetworkCredential::Thread(dataset) => dataset.validate(),
        }
    }
}

/// Reason a Wi-Fi station failed to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiFailReason {
    AuthError,
    ApNotFound,
}

/// Reason a Thread device failed to attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadFailReason {
    DatasetInvalid,
    NetworkNotFound,
}

/// Connection failure reason reported by the network stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "network", content = "reason", rename_all = "snake_case")]
pub enum FailReason {
    Wifi(WifiFailReason),
    Thread(ThreadFailReason),
}

impl FailReason {
    pub fn network_type(&self) -> NetworkType {
        match self {
            FailReason::Wifi(_) => NetworkType::Wifi,
            FailReason::Thread(_) => NetworkType::Thread,
        }
    }
}

/// Provisioning status of one network type within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CredentialStatus {
    NotReceived,
    Applied,
    ConnectionFailed(FailReason),
    Connected,
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialStatus::NotReceived => f.write_str("not_received"),
            CredentialStatus::Applied => f.write_str("applied"),
            CredentialStatus::ConnectionFailed(_) => f.write_str("connection_failed"),
            CredentialStatus::Connected => f.write_str("connected"),
        }
    }
}

/// Link state of a network interface as seen by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Connectivity signal published by the network stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(NetworkType),
    Disconnected(NetworkType),
    Failed(FailReason),
}

impl LinkEvent {
    pub fn network_type(&self) -> NetworkType {
        match self {
            LinkEvent::Connected(network) | LinkEvent::Disconnected(network) => *network,
            LinkEvent::Failed(reason) => reason.network_type(),
        }
    }
}

/// Represents a discovered WiFi network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network SSID
    pub ssid: String,
    /// MAC address (BSSID)
    pub mac: String,
    /// Channel number
    pub channel: u16,
    /// Signal strength in dBm
    pub rssi: i16,
}

/// WiFi scan state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Finished,
    Error,
}

/// Identifier of one client connection on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
