//! Unix socket scheme
//!
//! Serves a provisioning session as newline-delimited JSON-RPC over a Unix
//! domain socket. Every client connection is one transport session.

use std::{
    os::unix::{fs::PermissionsExt, net::UnixListener as StdUnixListener},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    core::{
        error::{SchemeError, SchemeResult},
        event::{EventHandler, ProvEvent},
    },
    protocol::{EndpointInfo, EventParams, JsonRpcNotification, JsonRpcRequest, SocketNotification},
    scheme::{ProtocolSession, Scheme},
    transport::unix_socket::{
        handler::RequestHandler,
        session::{SessionReader, UnixSocketSession},
    },
};

const NOTIFICATION_CAPACITY: usize = 100;

/// How long a closing connection waits for the session `end` event
const END_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Session configuration built by the manager before start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketConfig {
    pub service_name: String,
    pub service_key: Option<String>,
    pub endpoints: Vec<EndpointInfo>,
}

impl SocketConfig {
    pub(crate) fn endpoint(&self, name: &str) -> Option<&EndpointInfo> {
        self.endpoints.iter().find(|e| e.name == name)
    }
}

struct RunningServer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<UnixListener>,
    inherited: bool,
}

/// Provisioning transport over a Unix domain socket
pub struct UnixSocketScheme {
    socket_path: PathBuf,
    socket_mode: Option<u32>,
    inherited: Mutex<Option<StdUnixListener>>,
    notifications: broadcast::Sender<JsonRpcNotification>,
    running: tokio::sync::Mutex<Option<RunningServer>>,
}

impl UnixSocketScheme {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            socket_path: socket_path.into(),
            socket_mode: None,
            inherited: Mutex::new(None),
            notifications,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Permissions applied to the socket file after binding
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = Some(mode);
        self
    }

    /// Serve on an already bound listener, e.g. from socket activation
    ///
    /// The listener is kept across sessions and its file is never removed.
    pub fn with_listener(self, listener: StdUnixListener) -> Self {
        *self
            .inherited
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Event handler forwarding provisioning events to connected clients
    ///
    /// Pass it as the scheme handler when initializing the manager.
    pub fn event_handler(&self) -> Arc<dyn EventHandler> {
        let notifications = self.notifications.clone();
        Arc::new(move |event: &ProvEvent| {
            let notification = JsonRpcNotification::new(SocketNotification::Event(EventParams {
                event: event.name().to_string(),
            }));
            // No connected clients is fine
            let _ = notifications.send(notification);
        })
    }

    async fn listen(&self) -> SchemeResult<(UnixListener, bool)> {
        let inherited = self
            .inherited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = inherited {
            listener.set_nonblocking(true)?;
            return Ok((UnixListener::from_std(listener)?, true));
        }

        if self.socket_path.exists() {
            debug!("Removing stale socket {}", self.socket_path.display());
            fs::remove_file(&self.socket_path).await?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        if let Some(mode) = self.socket_mode {
            fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(mode)).await?;
        }
        Ok((listener, false))
    }
}

impl Scheme for UnixSocketScheme {
    type Config = SocketConfig;

    fn new_config(&self) -> SchemeResult<SocketConfig> {
        Ok(SocketConfig::default())
    }

    fn delete_config(&self, config: SocketConfig) {
        debug!(service_name = %config.service_name, "Socket configuration released");
    }

    fn set_service_identity(
        &self,
        config: &mut SocketConfig,
        name: &str,
        key: Option<&str>,
    ) -> SchemeResult<()> {
        if name.is_empty() {
            return Err(SchemeError::InvalidConfig("empty service name".into()));
        }
        config.service_name = name.to_string();
        config.service_key = key.map(str::to_string);
        Ok(())
    }

    fn set_endpoint(&self, config: &mut SocketConfig, name: &str, id: u16) -> SchemeResult<()> {
        if config.endpoint(name).is_some() {
            return Err(SchemeError::InvalidConfig(format!(
                "endpoint {} announced twice",
                name
            )));
        }
        config.endpoints.push(EndpointInfo {
            name: name.to_string(),
            id,
        });
        Ok(())
    }

    async fn start(&self, session: Arc<ProtocolSession>, config: &SocketConfig) -> SchemeResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchemeError::AlreadyRunning);
        }

        let (listener, inherited) = self.listen().await?;
        info!(
            "Unix socket scheme listening on {} as {}",
            self.socket_path.display(),
            config.service_name
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handler = Arc::new(RequestHandler::new(session, Arc::new(config.clone())));
        let task = tokio::spawn(accept_loop(
            listener,
            handler,
            self.notifications.clone(),
            shutdown_rx,
        ));

        *running = Some(RunningServer {
            shutdown,
            task,
            inherited,
        });
        Ok(())
    }

    async fn stop(&self, _session: &ProtocolSession) -> SchemeResult<()> {
        let server = self
            .running
            .lock()
            .await
            .take()
            .ok_or(SchemeError::NotRunning)?;

        server.shutdown.send_replace(true);
        let listener = server
            .task
            .await
            .map_err(|e| SchemeError::Protocol(format!("accept loop failed: {}", e)))?;

        if server.inherited {
            *self
                .inherited
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(listener.into_std()?);
        } else {
            drop(listener);
            if self.socket_path.exists() {
                fs::remove_file(&self.socket_path).await?;
            }
        }
        info!("Unix socket scheme stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: UnixListener,
    handler: Arc<RequestHandler>,
    notifications: broadcast::Sender<JsonRpcNotification>,
    mut shutdown: watch::Receiver<bool>,
) -> UnixListener {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let handler = handler.clone();
                    let notifications = notifications.subscribe();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler, notifications, shutdown).await {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            }
        }
    }
    listener
}

async fn handle_client(
    stream: UnixStream,
    handler: Arc<RequestHandler>,
    mut notifications: broadcast::Receiver<JsonRpcNotification>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let session = UnixSocketSession::new(write_half);
    let mut reader = SessionReader::new(read_half);
    info!("New client connected: {}", session.id());

    let result = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                break drain_until_end(&session, &mut notifications).await;
            }
            line = reader.read_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<JsonRpcRequest>(&line) {
                    Ok(request) => {
                        let response = handler.handle_request(session.id(), request).await;
                        if let Err(e) = session.send_response(&response).await {
                            break Err(e);
                        }
                    }
                    Err(e) => {
                        warn!("Invalid JSON-RPC request: {}", e);
                    }
                }
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    if let Err(e) = session.send_notification(&notification).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client {} missed {} notifications", session.id(), n);
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            }
        }
    };

    handler.close_session(session.id());
    info!("Client disconnected: {}", session.id());
    result
}

/// Keep forwarding notifications of a stopping session until `end` went out
///
/// The manager emits `end` only after the transport stopped, so connections
/// outlive the accept loop by up to [`END_DRAIN_TIMEOUT`].
async fn drain_until_end(
    session: &UnixSocketSession,
    notifications: &mut broadcast::Receiver<JsonRpcNotification>,
) -> std::io::Result<()> {
    match tokio::time::timeout(END_DRAIN_TIMEOUT, forward_until_end(session, notifications)).await
    {
        Ok(result) => result,
        Err(_) => {
            debug!("Client {} closed without end notification", session.id());
            Ok(())
        }
    }
}

async fn forward_until_end(
    session: &UnixSocketSession,
    notifications: &mut broadcast::Receiver<JsonRpcNotification>,
) -> std::io::Result<()> {
    loop {
        match notifications.recv().await {
            Ok(notification) => {
                session.send_notification(&notification).await?;
                let SocketNotification::Event(params) = &notification.notification;
                if params.event == ProvEvent::End.name() {
                    return Ok(());
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Client {} missed {} notifications", session.id(), n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::MockNetworkStack,
        core::{
            endpoint::{EP_PROTO_VER, EP_PROV_CONFIG},
            manager::{InstanceSlot, ProvisioningManager},
            security::SecurityConfig,
            types::{LinkEvent, NetworkType},
        },
        protocol::{CallParams, JsonRpcResponse, RequestId, SocketRequest, SocketResponse},
    };
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::{io::AsyncWriteExt, net::unix::OwnedWriteHalf};

    struct TestClient {
        reader: SessionReader,
        writer: OwnedWriteHalf,
        next_id: i64,
        notifications: Vec<JsonRpcNotification>,
    }

    impl TestClient {
        async fn connect(path: &Path) -> Self {
            let (read_half, writer) = UnixStream::connect(path).await.unwrap().into_split();
            Self {
                reader: SessionReader::new(read_half),
                writer,
                next_id: 1,
                notifications: Vec::new(),
            }
        }

        async fn request(&mut self, request: SocketRequest) -> JsonRpcResponse {
            let id = RequestId::Number(self.next_id);
            self.next_id += 1;
            let mut json = serde_json::to_vec(&JsonRpcRequest::new(request, id.clone())).unwrap();
            json.push(b'\n');
            self.writer.write_all(&json).await.unwrap();

            loop {
                let line = self.reader.read_line().await.unwrap().unwrap();
                if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    assert_eq!(response.id, id);
                    return response;
                }
                self.notifications
                    .push(serde_json::from_str(&line).unwrap());
            }
        }

        async fn call(&mut self, endpoint: &str, payload: Value) -> Value {
            let response = self
                .request(SocketRequest::Call(CallParams {
                    endpoint: endpoint.to_string(),
                    payload: hex::encode(serde_json::to_vec(&payload).unwrap()),
                }))
                .await;
            match response.result {
                Some(SocketResponse::Call(call)) => {
                    serde_json::from_slice(&hex::decode(call.payload).unwrap()).unwrap()
                }
                other => panic!("unexpected result {:?} / {:?}", other, response.error),
            }
        }

        async fn next_event(&mut self) -> String {
            let notification = if self.notifications.is_empty() {
                let line = self.reader.read_line().await.unwrap().unwrap();
                serde_json::from_str(&line).unwrap()
            } else {
                self.notifications.remove(0)
            };
            let JsonRpcNotification {
                notification: SocketNotification::Event(params),
                ..
            } = notification;
            params.event
        }

        /// Read until the server closes the connection
        async fn closed(&mut self) {
            while self.reader.read_line().await.unwrap().is_some() {}
        }
    }

    fn empty_session() -> Arc<ProtocolSession> {
        Arc::new(ProtocolSession::new(
            SecurityConfig::Sec0.session_layer(),
            Vec::<String>::new(),
        ))
    }

    #[tokio::test]
    async fn test_provisioning_over_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prov.sock");
        let scheme = UnixSocketScheme::new(&path).with_socket_mode(0o660);
        let scheme_events = scheme.event_handler();
        let network = MockNetworkStack::new();
        network
            .set_auto_outcome(Some(LinkEvent::Connected(NetworkType::Wifi)))
            .await;

        let slot = Arc::new(InstanceSlot::new());
        let manager = ProvisioningManager::init_in(
            &slot,
            scheme,
            network.clone(),
            Some(scheme_events),
            None,
        )
        .unwrap();
        manager.disable_auto_stop(100).await.unwrap();
        manager
            .start(SecurityConfig::Sec0, "dev1", None)
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        let mut client = TestClient::connect(&path).await;
        let response = client.request(SocketRequest::ListEndpoints).await;
        let Some(SocketResponse::Endpoints(endpoints)) = response.result else {
            panic!("unexpected response {:?}", response);
        };
        assert!(endpoints.endpoints.contains(&EndpointInfo {
            name: EP_PROV_CONFIG.to_string(),
            id: 0xFF52,
        }));

        let version = client.call(EP_PROTO_VER, json!({})).await;
        assert_eq!(version["prov"]["cap"], json!(["no_sec", "wifi_scan"]));

        let set = json!({
            "method": "set_config",
            "params": {"network": "wifi", "ssid": "X", "passphrase": "Y"}
        });
        assert_eq!(client.call(EP_PROV_CONFIG, set).await["status"], "ok");
        let apply = json!({"method": "apply_config", "params": {"network": "wifi"}});
        assert_eq!(client.call(EP_PROV_CONFIG, apply).await["status"], "ok");

        assert_eq!(client.next_event().await, "wifi_cred_recv");
        assert_eq!(client.next_event().await, "wifi_cred_success");

        manager.stop().await.unwrap();
        manager.wait().await;
        let end = tokio::time::timeout(Duration::from_secs(1), client.next_event())
            .await
            .unwrap();
        assert_eq!(end, "end");
        tokio::time::timeout(Duration::from_secs(1), client.closed())
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_start_and_stop_guards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prov.sock");
        let scheme = UnixSocketScheme::new(&path);
        let session = empty_session();
        let config = SocketConfig::default();

        assert!(matches!(
            scheme.stop(&session).await,
            Err(SchemeError::NotRunning)
        ));

        scheme.start(session.clone(), &config).await.unwrap();
        assert!(path.exists());
        assert!(matches!(
            scheme.start(session.clone(), &config).await,
            Err(SchemeError::AlreadyRunning)
        ));
        scheme.stop(&session).await.unwrap();
        assert!(!path.exists());

        // A new session binds again
        scheme.start(session.clone(), &config).await.unwrap();
        scheme.stop(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_socket_file_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prov.sock");
        std::fs::write(&path, b"stale").unwrap();

        let scheme = UnixSocketScheme::new(&path);
        let session = empty_session();
        scheme.start(session.clone(), &SocketConfig::default()).await.unwrap();
        TestClient::connect(&path).await;
        scheme.stop(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_inherited_listener_survives_sessions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activated.sock");
        let listener = StdUnixListener::bind(&path).unwrap();

        let scheme = UnixSocketScheme::new(dir.path().join("unused.sock")).with_listener(listener);
        let session = empty_session();
        let mut config = SocketConfig::default();
        scheme
            .set_service_identity(&mut config, "dev1", Some("key"))
            .unwrap();

        for _ in 0..2 {
            scheme.start(session.clone(), &config).await.unwrap();
            let mut client = TestClient::connect(&path).await;
            let response = client.request(SocketRequest::ServiceInfo).await;
            let Some(SocketResponse::ServiceInfo(info)) = response.result else {
                panic!("unexpected response {:?}", response);
            };
            assert_eq!(info.service_name, "dev1");
            assert!(info.key_required);

            scheme.stop(&session).await.unwrap();
            assert!(path.exists());
        }
    }

    #[test]
    fn test_config_validation() {
        let scheme = UnixSocketScheme::new("/nonexistent/prov.sock");
        let mut config = scheme.new_config().unwrap();

        assert!(matches!(
            scheme.set_service_identity(&mut config, "", None),
            Err(SchemeError::InvalidConfig(_))
        ));
        scheme.set_endpoint(&mut config, "custom", 0xFF54).unwrap();
        assert!(matches!(
            scheme.set_endpoint(&mut config, "custom", 0xFF55),
            Err(SchemeError::InvalidConfig(_))
        ));
        assert_eq!(config.endpoint("custom").map(|e| e.id), Some(0xFF54));
        scheme.delete_config(config);
    }
}
