//! wpa_supplicant network stack (Wi-Fi only), built on wifi-ctrl

use std::sync::Arc;
use tokio::{process::Command, sync::broadcast};
use tracing::{debug, error, info, warn};
use wifi_ctrl::sta::{Broadcast, BroadcastReceiver, RequestClient, WifiSetup};

use crate::{
    backend::NetworkStack,
    core::{
        error::{NetworkError, NetworkResult},
        types::{
            FailReason, LinkEvent, NetworkType, ThreadDataset, WifiConfig, WifiFailReason,
            WifiNetwork,
        },
    },
};

const LINK_EVENT_CAPACITY: usize = 16;

/// Wi-Fi station backed by a running wpa_supplicant
pub struct WpaSupplicantStack {
    interface: String,
    client: Arc<RequestClient>,
    events: broadcast::Sender<LinkEvent>,
}

impl WpaSupplicantStack {
    /// Connect to the wpa_supplicant control socket of `interface`
    pub async fn new(interface: String) -> NetworkResult<Self> {
        let path = format!("/var/run/wpa_supplicant/{}", interface);
        let mut setup =
            WifiSetup::new().map_err(|e| NetworkError::WpaSupplicantError(e.to_string()))?;
        setup.set_socket_path(path);

        let client = Arc::new(setup.get_request_client());
        let broadcast_receiver = setup.get_broadcast_receiver();
        let station = setup.complete();

        tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("wpa_supplicant station runtime error: {}", e);
            }
        });

        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        tokio::spawn(Self::forward_broadcasts(
            interface.clone(),
            client.clone(),
            broadcast_receiver,
            events.clone(),
        ));

        Ok(Self {
            interface,
            client,
            events,
        })
    }

    /// Translate wpa_supplicant broadcasts into link events
    async fn forward_broadcasts(
        interface: String,
        client: Arc<RequestClient>,
        mut receiver: BroadcastReceiver,
        events: broadcast::Sender<LinkEvent>,
    ) {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("wpa_supplicant broadcast receiver lagged by {}", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("wpa_supplicant broadcast channel closed");
                    break;
                }
            };
            debug!("wpa_supplicant broadcast: {:?}", event);

            let link_event = match event {
                Broadcast::Connected => {
                    // Persist only configurations that proved to work
                    if let Err(e) = client.save_config().await {
                        warn!("Failed to save wpa_supplicant config: {}", e);
                    }
                    match Self::ip_address(&interface).await {
                        Some(ip) => info!("Wi-Fi connected, address {}", ip),
                        None => info!("Wi-Fi connected, no address yet"),
                    }
                    LinkEvent::Connected(NetworkType::Wifi)
                }
                Broadcast::WrongPsk => LinkEvent::Failed(FailReason::Wifi(WifiFailReason::AuthError)),
                Broadcast::NetworkNotFound => {
                    LinkEvent::Failed(FailReason::Wifi(WifiFailReason::ApNotFound))
                }
                Broadcast::Disconnected => LinkEvent::Disconnected(NetworkType::Wifi),
                _ => continue,
            };

            // Nobody listening outside a provisioning session
            let _ = events.send(link_event);
        }
    }

    /// Convert a frequency in MHz to its channel number (0 if unknown)
    fn frequency_to_channel(freq_str: &str) -> u16 {
        match freq_str.parse::<u16>().unwrap_or(0) {
            2484 => 14,
            freq @ 2412..=2472 => (freq - 2407) / 5,
            freq @ 5160..=5885 => (freq - 5000) / 5,
            _ => 0,
        }
    }

    async fn ip_address(interface: &str) -> Option<String> {
        let output = Command::new("ip")
            .args(["-4", "addr", "show", interface])
            .output()
            .await
            .ok()?;

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("inet "))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|cidr| cidr.split('/').next())
            .map(str::to_string)
    }

    async fn command(&self, command: String) -> NetworkResult<()> {
        self.client
            .send_custom(command.clone())
            .await
            .map_err(|e| NetworkError::WpaSupplicantError(format!("{} failed: {}", command, e)))?;
        Ok(())
    }

    fn wifi_only(network: NetworkType) -> NetworkResult<()> {
        match network {
            NetworkType::Wifi => Ok(()),
            other => Err(NetworkError::Unsupported(other)),
        }
    }
}

impl NetworkStack for WpaSupplicantStack {
    fn supports(&self, network: NetworkType) -> bool {
        network == NetworkType::Wifi
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    async fn apply_wifi(&self, config: &WifiConfig) -> NetworkResult<()> {
        debug!("Configuring {} for network: {}", self.interface, config.ssid);

        let network_id = self.client.add_network().await.map_err(|e| {
            NetworkError::ApplyFailed(format!("Failed to add network: {}", e))
        })?;

        self.client
            .set_network_ssid(network_id, config.ssid.clone())
            .await
            .map_err(|e| NetworkError::ApplyFailed(format!("Failed to set SSID: {}", e)))?;

        if config.is_open() {
            self.command(format!("SET_NETWORK {} key_mgmt NONE", network_id))
                .await?;
        } else {
            self.client
                .set_network_psk(network_id, config.passphrase.clone())
                .await
                .map_err(|e| NetworkError::ApplyFailed(format!("Failed to set PSK: {}", e)))?;
        }

        if let Some(bssid) = config.bssid {
            let bssid = bssid
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":");
            self.command(format!("SET_NETWORK {} bssid {}", network_id, bssid))
                .await?;
        }

        self.client.select_network(network_id).await.map_err(|e| {
            NetworkError::ApplyFailed(format!("Failed to select network: {}", e))
        })?;

        debug!("Association started");
        Ok(())
    }

    async fn apply_thread(&self, _dataset: &ThreadDataset) -> NetworkResult<()> {
        Err(NetworkError::Unsupported(NetworkType::Thread))
    }

    async fn scan_wifi(&self) -> NetworkResult<Vec<WifiNetwork>> {
        debug!("Starting Wi-Fi scan on interface: {}", self.interface);

        let results = self
            .client
            .get_scan()
            .await
            .map_err(|e| NetworkError::ScanFailed(e.to_string()))?;

        let networks: Vec<WifiNetwork> = results
            .iter()
            .map(|res| WifiNetwork {
                ssid: res.name.clone(),
                mac: res.mac.clone(),
                channel: Self::frequency_to_channel(&res.frequency),
                rssi: res.signal as i16,
            })
            .collect();

        debug!("Scan complete, found {} networks", networks.len());
        Ok(networks)
    }

    async fn disconnect(&self, network: NetworkType) -> NetworkResult<()> {
        Self::wifi_only(network)?;
        self.command("DISCONNECT".to_string()).await
    }

    async fn is_provisioned(&self, network: NetworkType) -> NetworkResult<bool> {
        Self::wifi_only(network)?;
        let status = self
            .client
            .get_status()
            .await
            .map_err(|e| NetworkError::WpaSupplicantError(format!("Failed to get status: {}", e)))?;

        Ok(status.get("ssid").is_some_and(|ssid| !ssid.is_empty()))
    }

    async fn erase(&self, network: NetworkType) -> NetworkResult<()> {
        Self::wifi_only(network)?;
        self.command("REMOVE_NETWORK all".to_string()).await?;
        self.client.save_config().await.map_err(|e| {
            NetworkError::WpaSupplicantError(format!("Failed to save config: {}", e))
        })?;
        Ok(())
    }
}
