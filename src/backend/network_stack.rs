//! Network stack trait definition

use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::{
    error::NetworkResult,
    types::{LinkEvent, NetworkType, ThreadDataset, WifiConfig, WifiNetwork},
};

/// Abstraction over the device's network stack (Wi-Fi station, Thread)
///
/// Applying a configuration only starts the association; the outcome is
/// reported later on the [`LinkEvent`] channel.
#[make(Send)]
pub trait NetworkStack: Send + Sync + 'static {
    /// Whether this stack can provision the given network type
    fn supports(&self, network: NetworkType) -> bool;

    /// Subscribe to connectivity signals
    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;

    /// Configure the Wi-Fi station and start connecting
    async fn apply_wifi(&self, config: &WifiConfig) -> NetworkResult<()>;

    /// Configure the Thread dataset and start attaching
    async fn apply_thread(&self, dataset: &ThreadDataset) -> NetworkResult<()>;

    /// Scan for Wi-Fi networks
    async fn scan_wifi(&self) -> NetworkResult<Vec<WifiNetwork>>;

    /// Drop the configuration applied during this session and disconnect
    async fn disconnect(&self, network: NetworkType) -> NetworkResult<()>;

    /// Whether persisted credentials exist for the network type
    async fn is_provisioned(&self, network: NetworkType) -> NetworkResult<bool>;

    /// Restore persisted settings of the network type to defaults
    async fn erase(&self, network: NetworkType) -> NetworkResult<()>;
}
