//! Mock network stack for testing

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use crate::backend::NetworkStack;
use crate::core::error::{NetworkError, NetworkResult};
use crate::core::types::{
    FailReason, LinkEvent, NetworkCredential, NetworkType, ThreadDataset, WifiConfig, WifiNetwork,
};

/// Internal state for the mock stack
#[derive(Debug, Default)]
struct MockState {
    scan_results: Vec<WifiNetwork>,
    should_fail_scan: bool,
    should_fail_apply: bool,
    auto_outcome: Option<LinkEvent>,
    applied: Vec<NetworkCredential>,
    disconnects: Vec<NetworkType>,
    provisioned_wifi: bool,
    provisioned_thread: bool,
}

/// Mock network stack for testing
///
/// Records applied credentials and publishes link events on demand.
#[derive(Debug, Clone)]
pub struct MockNetworkStack {
    inner: Arc<Mutex<MockState>>,
    events: broadcast::Sender<LinkEvent>,
    wifi: bool,
    thread: bool,
}

impl MockNetworkStack {
    /// Create a mock supporting both Wi-Fi and Thread
    pub fn new() -> Self {
        Self::with_support(true, true)
    }

    /// Create a mock supporting only Wi-Fi
    pub fn wifi_only() -> Self {
        Self::with_support(true, false)
    }

    fn with_support(wifi: bool, thread: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Mutex::new(MockState::default())),
            events,
            wifi,
            thread,
        }
    }

    /// Configure mock to return specific networks on scan
    pub async fn set_scan_results(&self, networks: Vec<WifiNetwork>) {
        self.inner.lock().await.scan_results = networks;
    }

    /// Configure mock to fail scan operations
    pub async fn set_scan_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_scan = should_fail;
    }

    /// Configure mock to fail apply operations
    pub async fn set_apply_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_apply = should_fail;
    }

    /// Publish `outcome` right after every successful apply
    pub async fn set_auto_outcome(&self, outcome: Option<LinkEvent>) {
        self.inner.lock().await.auto_outcome = outcome;
    }

    /// Simulate the network becoming connected
    pub fn complete_connection(&self, network: NetworkType) {
        let _ = self.events.send(LinkEvent::Connected(network));
    }

    /// Simulate a connection failure
    pub fn fail_connection(&self, reason: FailReason) {
        let _ = self.events.send(LinkEvent::Failed(reason));
    }

    /// Credentials applied so far
    pub async fn applied(&self) -> Vec<NetworkCredential> {
        self.inner.lock().await.applied.clone()
    }

    /// Network types disconnected so far
    pub async fn disconnects(&self) -> Vec<NetworkType> {
        self.inner.lock().await.disconnects.clone()
    }

    async fn apply(&self, credential: NetworkCredential) -> NetworkResult<()> {
        let mut state = self.inner.lock().await;
        if state.should_fail_apply {
            return Err(NetworkError::ApplyFailed("Mock apply failure".into()));
        }
        match credential.network_type() {
            NetworkType::Wifi => state.provisioned_wifi = true,
            NetworkType::Thread => state.provisioned_thread = true,
        }
        state.applied.push(credential);
        if let Some(outcome) = state.auto_outcome {
            let _ = self.events.send(outcome);
        }
        Ok(())
    }
}

impl Default for MockNetworkStack {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStack for MockNetworkStack {
    fn supports(&self, network: NetworkType) -> bool {
        match network {
            NetworkType::Wifi => self.wifi,
            NetworkType::Thread => self.thread,
        }
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    async fn apply_wifi(&self, config: &WifiConfig) -> NetworkResult<()> {
        self.apply(NetworkCredential::Wifi(config.clone())).await
    }

    async fn apply_thread(&self, dataset: &ThreadDataset) -> NetworkResult<()> {
        self.apply(NetworkCredential::Thread(dataset.clone())).await
    }

    async fn scan_wifi(&self) -> NetworkResult<Vec<WifiNetwork>> {
        let state = self.inner.lock().await;
        if state.should_fail_scan {
            Err(NetworkError::ScanFailed("Mock scan failure".into()))
        } else {
            Ok(state.scan_results.clone())
        }
    }

    async fn disconnect(&self, network: NetworkType) -> NetworkResult<()> {
        self.inner.lock().await.disconnects.push(network);
        Ok(())
    }

    async fn is_provisioned(&self, network: NetworkType) -> NetworkResult<bool> {
        let state = self.inner.lock().await;
        Ok(match network {
            NetworkType::Wifi => state.provisioned_wifi,
            NetworkType::Thread => state.provisioned_thread,
        })
    }

    async fn erase(&self, network: NetworkType) -> NetworkResult<()> {
        let mut state = self.inner.lock().await;
        match network {
            NetworkType::Wifi => state.provisioned_wifi = false,
            NetworkType::Thread => state.provisioned_thread = false,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WifiFailReason;

    #[tokio::test]
    async fn test_mock_stack_scan() {
        let stack = MockNetworkStack::new();
        assert!(stack.scan_wifi().await.unwrap().is_empty());

        stack
            .set_scan_results(vec![WifiNetwork {
                ssid: "TestNetwork".into(),
                mac: "aa:bb:cc:dd:ee:ff".into(),
                channel: 6,
                rssi: -65,
            }])
            .await;
        let results = stack.scan_wifi().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ssid, "TestNetwork");

        stack.set_scan_failure(true).await;
        assert!(stack.scan_wifi().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_stack_apply_and_events() {
        let stack = MockNetworkStack::new();
        let mut events = stack.link_events();
        stack
            .set_auto_outcome(Some(LinkEvent::Connected(NetworkType::Wifi)))
            .await;

        let config = WifiConfig::new("MyNetwork", "password");
        stack.apply_wifi(&config).await.unwrap();

        assert_eq!(stack.applied().await, vec![NetworkCredential::Wifi(config)]);
        assert!(stack.is_provisioned(NetworkType::Wifi).await.unwrap());
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Connected(NetworkType::Wifi)
        );

        stack.fail_connection(FailReason::Wifi(WifiFailReason::AuthError));
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Failed(FailReason::Wifi(WifiFailReason::AuthError))
        );

        stack.erase(NetworkType::Wifi).await.unwrap();
        assert!(!stack.is_provisioned(NetworkType::Wifi).await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_stack_apply_failure() {
        let stack = MockNetworkStack::wifi_only();
        assert!(!stack.supports(NetworkType::Thread));

        stack.set_apply_failure(true).await;
        assert!(
            stack
                .apply_wifi(&WifiConfig::new("Net", "password"))
                .await
                .is_err()
        );
        assert!(stack.applied().await.is_empty());
    }
}
