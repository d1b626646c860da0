//! Handlers of the built-in endpoints

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

use crate::{
    backend::NetworkStack,
    core::{
        endpoint::{EP_PROTO_VER, EP_PROV_CONFIG, EP_PROV_CTRL, EP_PROV_SCAN, EndpointHandler},
        error::{EndpointError, EndpointResult},
        manager::{ProvisioningManager, WeakManager},
        types::{CredentialStatus, NetworkCredential, NetworkType, SessionId},
    },
    protocol::{
        AckResponse, ConfigRequest, ConfigStatusResponse, CtrlRequest, NetworkParams, ScanRequest,
        ScanResultsResponse, ScanStatusResponse,
    },
    scheme::{ProtocolSession, Scheme},
};

type StagedCredentials = Arc<Mutex<HashMap<(SessionId, NetworkType), NetworkCredential>>>;

/// Bind handlers for every built-in endpoint except `prov-session`, which
/// the session answers itself
pub(crate) async fn bind_builtin<S: Scheme, N: NetworkStack>(
    manager: WeakManager<S, N>,
    session: &ProtocolSession,
) {
    session
        .bind(EP_PROV_CONFIG, Arc::new(config_handler(manager.clone())))
        .await;
    session
        .bind(EP_PROV_SCAN, Arc::new(scan_handler(manager.clone())))
        .await;
    session
        .bind(EP_PROV_CTRL, Arc::new(ctrl_handler(manager.clone())))
        .await;
    session
        .bind(EP_PROTO_VER, Arc::new(version_handler(manager)))
        .await;
}

fn released() -> EndpointError {
    EndpointError::Rejected("provisioning manager released".into())
}

fn config_handler<S: Scheme, N: NetworkStack>(manager: WeakManager<S, N>) -> impl EndpointHandler {
    let staged = StagedCredentials::default();

    move |session_id: SessionId, request: Vec<u8>| {
        let manager = manager.clone();
        let staged = staged.clone();
        async move {
            let manager = manager.upgrade().ok_or_else(released)?;
            let request: ConfigRequest = serde_json::from_slice(&request)?;

            let response = match request {
                ConfigRequest::GetStatus(NetworkParams { network }) => {
                    let status = manager.credential_status(network).await;
                    let response = serde_json::to_vec(&ConfigStatusResponse::ok(
                        network,
                        status,
                        manager.link_state(network).await,
                        manager.disconnect_reason(network).await,
                    ))?;
                    if status == CredentialStatus::Connected {
                        manager.connected_status_reported().await;
                    }
                    response
                }
                ConfigRequest::SetConfig(params) => {
                    let network = params.network_type();
                    let credential = params
                        .into_credential()
                        .map_err(EndpointError::InvalidRequest)?;
                    debug!(%session_id, %network, "Staging credentials");
                    staged
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert((session_id, network), credential);
                    serde_json::to_vec(&AckResponse::ok())?
                }
                ConfigRequest::ApplyConfig(NetworkParams { network }) => {
                    let credential = staged
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&(session_id, network))
                        .ok_or_else(|| {
                            EndpointError::Rejected(format!("no {} configuration staged", network))
                        })?;
                    manager.apply_credential(credential).await?;
                    serde_json::to_vec(&AckResponse::ok())?
                }
            };
            Ok::<_, EndpointError>(response)
        }
    }
}

fn scan_handler<S: Scheme, N: NetworkStack>(manager: WeakManager<S, N>) -> impl EndpointHandler {
    move |_session_id: SessionId, request: Vec<u8>| {
        let manager = manager.clone();
        async move {
            let manager = manager.upgrade().ok_or_else(released)?;
            let request: ScanRequest = serde_json::from_slice(&request)?;

            let response = match request {
                ScanRequest::Start => {
                    manager.start_scan().await?;
                    scan_status(&manager).await?
                }
                ScanRequest::Status => scan_status(&manager).await?,
                ScanRequest::Results(params) => {
                    let networks = manager
                        .scan_results(params.start_index, params.count)
                        .await?;
                    serde_json::to_vec(&ScanResultsResponse::ok(networks))?
                }
            };
            Ok::<_, EndpointError>(response)
        }
    }
}

async fn scan_status<S: Scheme, N: NetworkStack>(
    manager: &ProvisioningManager<S, N>,
) -> EndpointResult<Vec<u8>> {
    let status = manager.scan_status().await;
    Ok(serde_json::to_vec(&ScanStatusResponse::ok(
        status.state,
        status.result_count,
        status.error,
    ))?)
}

fn ctrl_handler<S: Scheme, N: NetworkStack>(manager: WeakManager<S, N>) -> impl EndpointHandler {
    move |_session_id: SessionId, request: Vec<u8>| {
        let manager = manager.clone();
        async move {
            let manager = manager.upgrade().ok_or_else(released)?;
            let request: CtrlRequest = serde_json::from_slice(&request)?;
            match request {
                CtrlRequest::Reset(NetworkParams { network }) => {
                    manager.reset_on_failure(network).await?;
                }
                CtrlRequest::Reprov(NetworkParams { network }) => {
                    manager.reset_for_reprovision(network).await?;
                }
            }
            Ok::<_, EndpointError>(serde_json::to_vec(&AckResponse::ok())?)
        }
    }
}

fn version_handler<S: Scheme, N: NetworkStack>(manager: WeakManager<S, N>) -> impl EndpointHandler {
    move |_session_id: SessionId, _request: Vec<u8>| {
        let manager = manager.clone();
        async move {
            let manager = manager.upgrade().ok_or_else(released)?;
            let document = manager
                .with_version_document(|document| serde_json::to_vec(&document))
                .await?;
            Ok::<_, EndpointError>(document?)
        }
    }
}
