//! Credential application layer
//!
//! Hands received credentials to the network stack and tracks, per network
//! type, how far the attempt got. Outcomes arrive later as [`LinkEvent`]s.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    backend::NetworkStack,
    core::{
        error::{NetworkError, ProvError, ProvResult},
        event::ProvEvent,
        types::{
            CredentialStatus, FailReason, LinkEvent, LinkState, NetworkCredential, NetworkType,
        },
    },
};

/// Per network type state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CredentialRecord {
    status: CredentialStatus,
    link: Option<LinkState>,
    fail_reason: Option<FailReason>,
}

impl CredentialRecord {
    fn new() -> Self {
        Self {
            status: CredentialStatus::NotReceived,
            link: None,
            fail_reason: None,
        }
    }

    fn check_apply(&self) -> ProvResult<()> {
        match self.status {
            CredentialStatus::NotReceived | CredentialStatus::ConnectionFailed(_) => Ok(()),
            other => Err(ProvError::invalid_state("apply credentials", other)),
        }
    }

    fn mark_applied(&mut self) {
        self.status = CredentialStatus::Applied;
        self.link = Some(LinkState::Connecting);
        self.fail_reason = None;
    }

    /// Returns the event to emit, at most once per applied attempt
    fn on_link_event(&mut self, event: LinkEvent) -> Option<ProvEvent> {
        match event {
            LinkEvent::Connected(network) => {
                self.link = Some(LinkState::Connected);
                if self.status == CredentialStatus::Applied {
                    self.status = CredentialStatus::Connected;
                    return Some(ProvEvent::CredentialSuccess(network));
                }
            }
            LinkEvent::Failed(reason) => {
                self.link = Some(LinkState::Failed);
                self.fail_reason = Some(reason);
                if self.status == CredentialStatus::Applied {
                    self.status = CredentialStatus::ConnectionFailed(reason);
                    return Some(ProvEvent::CredentialFailed(reason));
                }
            }
            LinkEvent::Disconnected(_) => {
                self.link = Some(LinkState::Disconnected);
            }
        }
        None
    }
}

/// Credential application service
pub struct CredentialService<N: NetworkStack> {
    network: Arc<N>,
    records: RwLock<HashMap<NetworkType, CredentialRecord>>,
}

impl<N: NetworkStack> CredentialService<N> {
    pub fn new(network: Arc<N>) -> Self {
        let records = NetworkType::ALL
            .iter()
            .map(|network| (*network, CredentialRecord::new()))
            .collect();
        Self {
            network,
            records: RwLock::new(records),
        }
    }

    /// Validate `credential` and hand it to the network stack
    ///
    /// On success the status is `Applied`; the connection outcome is
    /// reported through [`Self::on_link_event`].
    pub async fn apply(&self, credential: &NetworkCredential) -> ProvResult<()> {
        let network = credential.network_type();
        credential.validate().map_err(ProvError::CredentialRejected)?;
        if !self.network.supports(network) {
            return Err(NetworkError::Unsupported(network).into());
        }

        self.record(network).await.check_apply()?;

        match credential {
            NetworkCredential::Wifi(config) => {
                info!("Applying Wi-Fi credentials for SSID: {}", config.ssid);
                self.network.apply_wifi(config).await?;
            }
            NetworkCredential::Thread(dataset) => {
                info!("Applying Thread dataset ({} bytes)", dataset.tlvs.len());
                self.network.apply_thread(dataset).await?;
            }
        }

        self.with_record(network, CredentialRecord::mark_applied)
            .await;
        Ok(())
    }

    /// Feed a connectivity signal into the state machine
    pub async fn on_link_event(&self, event: LinkEvent) -> Option<ProvEvent> {
        debug!("Link event: {:?}", event);
        self.with_record(event.network_type(), |record| record.on_link_event(event))
            .await
    }

    pub async fn status(&self, network: NetworkType) -> CredentialStatus {
        self.record(network).await.status
    }

    pub async fn link_state(&self, network: NetworkType) -> Option<LinkState> {
        self.record(network).await.link
    }

    pub async fn fail_reason(&self, network: NetworkType) -> Option<FailReason> {
        self.record(network).await.fail_reason
    }

    /// Abandon a failed or unresolved attempt so new credentials are accepted
    pub async fn reset_on_failure(&self, network: NetworkType) -> ProvResult<()> {
        match self.record(network).await.status {
            CredentialStatus::ConnectionFailed(_) | CredentialStatus::Applied => {}
            other => return Err(ProvError::invalid_state("reset after failure", other)),
        }

        self.network.disconnect(network).await?;
        self.reset(network).await;
        Ok(())
    }

    /// Unconditionally return `network` to `NotReceived`
    pub async fn reset(&self, network: NetworkType) {
        debug!("Resetting {} credential state", network);
        self.with_record(network, |record| *record = CredentialRecord::new())
            .await;
    }

    pub async fn reset_all(&self) {
        let mut records = self.records.write().await;
        for record in records.values_mut() {
            *record = CredentialRecord::new();
        }
    }

    async fn record(&self, network: NetworkType) -> CredentialRecord {
        self.records
            .read()
            .await
            .get(&network)
            .copied()
            .unwrap_or_else(CredentialRecord::new)
    }

    async fn with_record<T>(
        &self,
        network: NetworkType,
        f: impl FnOnce(&mut CredentialRecord) -> T,
    ) -> T {
        let mut records = self.records.write().await;
        let record = records.entry(network).or_insert_with(|| {
            warn!("Creating missing {} credential record", network);
            CredentialRecord::new()
        });
        f(record)
    }
}
