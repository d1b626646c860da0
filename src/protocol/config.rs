//! `prov-config` endpoint messages

use serde::{Deserialize, Serialize};

use crate::{
    core::types::{
        CredentialStatus, FailReason, LinkState, NetworkCredential, NetworkType, ThreadDataset,
        WifiConfig,
    },
    protocol::ctrl::NetworkParams,
};

/// Requests accepted on the config endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum ConfigRequest {
    /// Report provisioning status of a network type
    GetStatus(NetworkParams),

    /// Stage credentials for this client
    SetConfig(CredentialParams),

    /// Apply the staged credentials
    ApplyConfig(NetworkParams),
}

/// Credentials as sent by a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "network", rename_all = "snake_case")]
pub enum CredentialParams {
    Wifi {
        ssid: String,
        #[serde(default)]
        passphrase: String,
        /// Hex-encoded, separators allowed (`aa:bb:..`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bssid: Option<String>,
        #[serde(default)]
        channel: u8,
    },
    Thread {
        /// Hex-encoded TLVs
        dataset: String,
    },
}

impl CredentialParams {
    pub fn network_type(&self) -> NetworkType {
        match self {
            CredentialParams::Wifi { .. } => NetworkType::Wifi,
            CredentialParams::Thread { .. } => NetworkType::Thread,
        }
    }

    /// Decode into a validated credential
    pub fn into_credential(self) -> Result<NetworkCredential, String> {
        let credential = match self {
            CredentialParams::Wifi {
                ssid,
                passphrase,
                bssid,
                channel,
            } => {
                let bssid = bssid.as_deref().map(decode_bssid).transpose()?;
                NetworkCredential::Wifi(WifiConfig {
                    ssid,
                    passphrase,
                    bssid,
                    channel,
                })
            }
            CredentialParams::Thread { dataset } => {
                let tlvs =
                    hex::decode(&dataset).map_err(|e| format!("Invalid dataset hex: {}", e))?;
                NetworkCredential::Thread(ThreadDataset::new(tlvs))
            }
        };
        credential.validate()?;
        Ok(credential)
    }
}

fn decode_bssid(text: &str) -> Result<[u8; 6], String> {
    let digits: String = text.chars().filter(|c| *c != ':' && *c != '-').collect();
    let bytes = hex::decode(&digits).map_err(|e| format!("Invalid BSSID: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("BSSID must be 6 bytes, got {}", b.len()))
}

/// Response for `get_status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigStatusResponse {
    pub status: String,
    pub network: NetworkType,
    pub credential: CredentialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<FailReason>,
}

impl ConfigStatusResponse {
    pub fn ok(
        network: NetworkType,
        credential: CredentialStatus,
        link: Option<LinkState>,
        fail_reason: Option<FailReason>,
    ) -> Self {
        Self {
            status: "ok".to_string(),
            network,
            credential,
            link,
            fail_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WifiFailReason;

    #[test]
    fn test_set_config_wifi_parse() {
        let json = r#"{"method":"set_config","params":{"network":"wifi","ssid":"HomeNet","passphrase":"password123","bssid":"aa:bb:cc:dd:ee:ff"}}"#;
        let request: ConfigRequest = serde_json::from_str(json).unwrap();

        let ConfigRequest::SetConfig(params) = request else {
            panic!("expected set_config");
        };
        assert_eq!(params.network_type(), NetworkType::Wifi);

        let NetworkCredential::Wifi(config) = params.into_credential().unwrap() else {
            panic!("expected wifi credential");
        };
        assert_eq!(config.ssid, "HomeNet");
        assert_eq!(config.bssid, Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
        assert_eq!(config.channel, 0);
    }

    #[test]
    fn test_set_config_thread_parse() {
        let params = CredentialParams::Thread {
            dataset: "0003000010".to_string(),
        };
        let NetworkCredential::Thread(dataset) = params.into_credential().unwrap() else {
            panic!("expected thread credential");
        };
        assert_eq!(dataset.tlvs, vec![0x00, 0x03, 0x00, 0x00, 0x10]);
    }

    #[test]
    fn test_invalid_credentials_rejected() {
        let long_pass = CredentialParams::Wifi {
            ssid: "HomeNet".into(),
            passphrase: "p".repeat(65),
            bssid: None,
            channel: 0,
        };
        assert!(long_pass.into_credential().is_err());

        let bad_bssid = CredentialParams::Wifi {
            ssid: "HomeNet".into(),
            passphrase: String::new(),
            bssid: Some("aa:bb".into()),
            channel: 0,
        };
        assert!(bad_bssid.into_credential().is_err());

        let bad_hex = CredentialParams::Thread {
            dataset: "zz".into(),
        };
        assert!(bad_hex.into_credential().is_err());
    }

    #[test]
    fn test_status_response_serialization() {
        let response = ConfigStatusResponse::ok(
            NetworkType::Wifi,
            CredentialStatus::ConnectionFailed(FailReason::Wifi(WifiFailReason::ApNotFound)),
            Some(LinkState::Failed),
            Some(FailReason::Wifi(WifiFailReason::ApNotFound)),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"ok""#));
        assert!(json.contains(r#""state":"connection_failed""#));
        assert!(json.contains(r#""link":"failed""#));

        let parsed: ConfigStatusResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }
}
