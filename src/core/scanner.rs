//! Wi-Fi scan service backing the `prov-scan` endpoint

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    backend::NetworkStack,
    core::{
        error::{NetworkError, ProvError, ProvResult},
        types::{NetworkType, ScanState, WifiNetwork},
    },
};

/// Scan state machine
#[derive(Debug)]
struct ScanStateMachine {
    state: ScanState,
    results: Vec<WifiNetwork>,
    error: Option<String>,
}

impl ScanStateMachine {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            results: Vec::new(),
            error: None,
        }
    }

    fn start_scan(&mut self) -> ProvResult<()> {
        match self.state {
            ScanState::Scanning => Err(ProvError::invalid_state("start scan", "scanning")),
            _ => {
                self.state = ScanState::Scanning;
                self.results.clear();
                self.error = None;
                Ok(())
            }
        }
    }

    fn complete_scan(&mut self, mut networks: Vec<WifiNetwork>) {
        // strongest first
        networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        self.state = ScanState::Finished;
        self.results = networks;
        self.error = None;
    }

    fn fail_scan(&mut self, error: String) {
        self.state = ScanState::Error;
        self.error = Some(error);
        self.results.clear();
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Scan outcome snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStatus {
    pub state: ScanState,
    pub result_count: usize,
    pub error: Option<String>,
}

/// Wi-Fi scanning service
///
/// Scans run in the background; clients poll the state and read the
/// results in pages.
pub struct ScanService<N: NetworkStack> {
    network: Arc<N>,
    state_machine: Arc<RwLock<ScanStateMachine>>,
}

impl<N: NetworkStack> ScanService<N> {
    pub fn new(network: Arc<N>) -> Self {
        Self {
            network,
            state_machine: Arc::new(RwLock::new(ScanStateMachine::new())),
        }
    }

    /// Start a Wi-Fi scan
    ///
    /// Returns an error if a scan is already in progress or the stack has
    /// no Wi-Fi support.
    pub async fn start_scan(&self) -> ProvResult<()> {
        if !self.network.supports(NetworkType::Wifi) {
            return Err(NetworkError::Unsupported(NetworkType::Wifi).into());
        }

        self.state_machine.write().await.start_scan()?;

        let network = self.network.clone();
        let state_machine = self.state_machine.clone();

        tokio::spawn(async move {
            match network.scan_wifi().await {
                Ok(networks) => {
                    debug!("Scan finished with {} networks", networks.len());
                    state_machine.write().await.complete_scan(networks);
                }
                Err(e) => {
                    warn!("Scan failed: {}", e);
                    state_machine.write().await.fail_scan(e.to_string());
                }
            }
        });

        Ok(())
    }

    pub async fn status(&self) -> ScanStatus {
        let sm = self.state_machine.read().await;
        ScanStatus {
            state: sm.state,
            result_count: sm.results.len(),
            error: sm.error.clone(),
        }
    }

    /// Read `count` results starting at `start`
    pub async fn results(&self, start: usize, count: usize) -> ProvResult<Vec<WifiNetwork>> {
        let sm = self.state_machine.read().await;
        if sm.state != ScanState::Finished {
            return Err(ProvError::invalid_state("read scan results", "no scan results"));
        }
        if start > sm.results.len() {
            return Err(ProvError::InvalidArgument(format!(
                "start index {} beyond {} results",
                start,
                sm.results.len()
            )));
        }
        Ok(sm.results.iter().skip(start).take(count).cloned().collect())
    }

    /// Forget any previous scan
    pub async fn reset(&self) {
        self.state_machine.write().await.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockNetworkStack;

    fn network(ssid: &str, rssi: i16) -> WifiNetwork {
        WifiNetwork {
            ssid: ssid.into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
            channel: 6,
            rssi,
        }
    }

    #[test]
    fn test_scan_state_machine_transitions() {
        let mut sm = ScanStateMachine::new();
        assert_eq!(sm.state, ScanState::Idle);

        sm.start_scan().unwrap();
        assert_eq!(sm.state, ScanState::Scanning);
        assert!(sm.start_scan().is_err());

        sm.complete_scan(vec![network("Weak", -80), network("Strong", -40)]);
        assert_eq!(sm.state, ScanState::Finished);
        assert_eq!(sm.results[0].ssid, "Strong");

        sm.reset();
        assert_eq!(sm.state, ScanState::Idle);
        assert!(sm.results.is_empty());
    }

    #[test]
    fn test_scan_state_machine_error() {
        let mut sm = ScanStateMachine::new();
        sm.start_scan().unwrap();
        sm.fail_scan("Test error".into());

        assert_eq!(sm.state, ScanState::Error);
        assert_eq!(sm.error.as_deref(), Some("Test error"));

        // A failed scan can be retried
        sm.start_scan().unwrap();
    }

    #[tokio::test]
    async fn test_scan_service_paged_results() {
        let stack = Arc::new(MockNetworkStack::new());
        stack
            .set_scan_results(vec![
                network("A", -50),
                network("B", -60),
                network("C", -70),
            ])
            .await;

        let service = ScanService::new(stack);
        service.start_scan().await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        let status = service.status().await;
        assert_eq!(status.state, ScanState::Finished);
        assert_eq!(status.result_count, 3);

        let page = service.results(1, 5).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].ssid, "B");

        assert!(service.results(4, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_service_failure() {
        let stack = Arc::new(MockNetworkStack::new());
        stack.set_scan_failure(true).await;

        let service = ScanService::new(stack);
        service.start_scan().await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

        let status = service.status().await;
        assert_eq!(status.state, ScanState::Error);
        assert!(status.error.is_some());
        assert!(service.results(0, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_service_operation_in_progress() {
        let stack = Arc::new(MockNetworkStack::new());
        let service = ScanService::new(stack);

        service.start_scan().await.unwrap();
        assert!(service.start_scan().await.is_err());
    }
}
