//! Request routing for one provisioning session
//!
//! A scheme receives a [`ProtocolSession`] at start and forwards every
//! client request to [`ProtocolSession::dispatch`]. The session checks the
//! endpoint exists, enforces the security gate and calls the bound handler.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::{
    endpoint::{EP_PROTO_VER, EP_PROV_SESSION, EndpointHandler},
    error::{EndpointError, EndpointResult},
    security::SessionSecurity,
    types::SessionId,
};

/// Endpoints reachable before a security session is established
const UNGATED_ENDPOINTS: [&str; 2] = [EP_PROV_SESSION, EP_PROTO_VER];

pub struct ProtocolSession {
    security: Arc<dyn SessionSecurity>,
    endpoints: HashSet<String>,
    handlers: RwLock<HashMap<String, Arc<dyn EndpointHandler>>>,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProtocolSession {
    pub(crate) fn new(
        security: Arc<dyn SessionSecurity>,
        endpoints: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            security,
            endpoints: endpoints.into_iter().collect(),
            handlers: RwLock::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Security version negotiated for this session
    pub fn security_version(&self) -> u8 {
        self.security.version()
    }

    /// Number of requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Route a request from transport session `session_id` to `endpoint`
    pub async fn dispatch(
        &self,
        session_id: SessionId,
        endpoint: &str,
        request: Vec<u8>,
    ) -> EndpointResult<Vec<u8>> {
        if !self.endpoints.contains(endpoint) {
            return Err(EndpointError::UnknownEndpoint(endpoint.to_string()));
        }

        if endpoint == EP_PROV_SESSION {
            let _guard = InFlight::enter(&self.in_flight);
            return self.security.handshake(session_id, &request);
        }

        if !UNGATED_ENDPOINTS.contains(&endpoint) && !self.security.is_established(session_id) {
            warn!(%session_id, endpoint, "Request before security session established");
            return Err(EndpointError::Unauthorized);
        }

        let handler = self
            .handlers
            .read()
            .await
            .get(endpoint)
            .cloned()
            .ok_or_else(|| EndpointError::Unbound(endpoint.to_string()))?;

        let _guard = InFlight::enter(&self.in_flight);
        debug!(%session_id, endpoint, len = request.len(), "Dispatching request");
        handler.handle(session_id, request).await
    }

    /// Forget security state of a disconnected transport session
    pub fn close_transport_session(&self, session_id: SessionId) {
        self.security.close(session_id);
    }

    pub(crate) async fn bind(&self, endpoint: &str, handler: Arc<dyn EndpointHandler>) {
        self.handlers
            .write()
            .await
            .insert(endpoint.to_string(), handler);
    }

    pub(crate) async fn unbind(&self, endpoint: &str) -> bool {
        self.handlers.write().await.remove(endpoint).is_some()
    }

    pub(crate) async fn clear(&self) {
        self.handlers.write().await.clear();
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("security_version", &self.security.version())
            .field("endpoints", &self.endpoints)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
