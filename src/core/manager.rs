//! Provisioning manager: session lifecycle, endpoint registry and deferred stop
//!
//! One manager instance may be live per [`InstanceSlot`]. Every state
//! transition happens under a single state lock, and every event is emitted
//! while that lock is held, which fixes the order listeners observe.

use std::{
    sync::{
        Arc, LazyLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, MutexGuard, broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::NetworkStack,
    core::{
        app_info::{AppInfoRegistry, PROV_VERSION, ProvInfo, VersionDocument},
        credential::CredentialService,
        endpoint::{EndpointDescriptor, EndpointHandler, EndpointRegistry},
        error::{ProvError, ProvResult},
        event::{EventEmitter, EventHandler, ProvEvent},
        handlers,
        scanner::{ScanService, ScanStatus},
        security::SecurityConfig,
        timer::{DEFAULT_CLEANUP_DELAY, MAX_STOP_DELAY, StopTimer, clamp_cleanup_delay},
        types::{
            CredentialStatus, FailReason, LinkEvent, LinkState, NetworkCredential, NetworkType,
            ProvState, ThreadDataset, WifiConfig, WifiNetwork,
        },
    },
    scheme::{ProtocolSession, Scheme},
};

static GLOBAL_SLOT: LazyLock<Arc<InstanceSlot>> = LazyLock::new(|| Arc::new(InstanceSlot::new()));

/// Holder of the "one live manager" guarantee
///
/// [`ProvisioningManager::init`] uses a process-wide slot; tests and
/// embedders running several independent managers pass their own.
#[derive(Debug, Default)]
pub struct InstanceSlot {
    occupied: AtomicBool,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::SeqCst)
    }

    fn acquire(self: &Arc<Self>) -> ProvResult<SlotLease> {
        self.occupied
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ProvError::AlreadyInitialized)?;
        Ok(SlotLease(self.clone()))
    }
}

/// Releases the slot when dropped
#[derive(Debug)]
struct SlotLease(Arc<InstanceSlot>);

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.0.occupied.store(false, Ordering::SeqCst);
    }
}

/// Published lifecycle phase, readable without the state lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PhaseSnapshot {
    generation: u64,
    state: ProvState,
}

struct ManagerState<C> {
    phase: ProvState,
    /// Incremented by every start; stale timers and monitors compare against it
    generation: u64,
    emitter: EventEmitter,
    lease: Option<SlotLease>,
    endpoints: EndpointRegistry,
    app_info: AppInfoRegistry,
    auto_stop: bool,
    cleanup_delay: Duration,
    security: Option<SecurityConfig>,
    session: Option<Arc<ProtocolSession>>,
    config: Option<C>,
    stop_timer: StopTimer,
    /// Post-success stop still waits for the client to read the outcome
    awaiting_status_query: bool,
    monitor: Option<JoinHandle<()>>,
}

impl<C> ManagerState<C> {
    fn require_initialized(&self) -> ProvResult<()> {
        match self.phase {
            ProvState::Uninitialized | ProvState::Deinitialized => Err(ProvError::NotInitialized),
            _ => Ok(()),
        }
    }

    fn require(&self, expected: ProvState, operation: &'static str) -> ProvResult<()> {
        self.require_initialized()?;
        if self.phase != expected {
            return Err(ProvError::invalid_state(operation, self.phase));
        }
        Ok(())
    }
}

struct Inner<S: Scheme, N: NetworkStack> {
    scheme: S,
    network: Arc<N>,
    credentials: CredentialService<N>,
    scanner: ScanService<N>,
    state: Mutex<ManagerState<S::Config>>,
    phase: watch::Sender<PhaseSnapshot>,
    events: broadcast::Sender<ProvEvent>,
}

/// Handle to the provisioning manager
///
/// Cheap to clone; all clones drive the same instance.
pub struct ProvisioningManager<S: Scheme, N: NetworkStack> {
    inner: Arc<Inner<S, N>>,
}

impl<S: Scheme, N: NetworkStack> Clone for ProvisioningManager<S, N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Non-owning handle held by background tasks and built-in handlers
pub(crate) struct WeakManager<S: Scheme, N: NetworkStack> {
    inner: Weak<Inner<S, N>>,
}

impl<S: Scheme, N: NetworkStack> Clone for WeakManager<S, N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Scheme, N: NetworkStack> WeakManager<S, N> {
    pub(crate) fn upgrade(&self) -> Option<ProvisioningManager<S, N>> {
        self.inner
            .upgrade()
            .map(|inner| ProvisioningManager { inner })
    }
}

impl<S: Scheme, N: NetworkStack> ProvisioningManager<S, N> {
    /// Initialize the process-wide manager
    ///
    /// Fails with `AlreadyInitialized` while another instance is live.
    pub fn init(
        scheme: S,
        network: N,
        scheme_handler: Option<Arc<dyn EventHandler>>,
        app_handler: Option<Arc<dyn EventHandler>>,
    ) -> ProvResult<Self> {
        Self::init_in(&GLOBAL_SLOT, scheme, network, scheme_handler, app_handler)
    }

    /// Initialize a manager guarded by `slot`
    pub fn init_in(
        slot: &Arc<InstanceSlot>,
        scheme: S,
        network: N,
        scheme_handler: Option<Arc<dyn EventHandler>>,
        app_handler: Option<Arc<dyn EventHandler>>,
    ) -> ProvResult<Self> {
        let lease = slot.acquire()?;
        let network = Arc::new(network);
        let emitter = EventEmitter::new(scheme_handler, app_handler);
        let events = emitter.subscribers();
        let (phase, _) = watch::channel(PhaseSnapshot {
            generation: 0,
            state: ProvState::Idle,
        });

        let state = ManagerState {
            phase: ProvState::Idle,
            generation: 0,
            emitter,
            lease: Some(lease),
            endpoints: EndpointRegistry::new(),
            app_info: AppInfoRegistry::new(),
            auto_stop: true,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            security: None,
            session: None,
            config: None,
            stop_timer: StopTimer::default(),
            awaiting_status_query: false,
            monitor: None,
        };
        state.emitter.emit(ProvEvent::Init);
        info!("Provisioning manager initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                scheme,
                credentials: CredentialService::new(network.clone()),
                scanner: ScanService::new(network.clone()),
                network,
                state: Mutex::new(state),
                phase,
                events,
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakManager<S, N> {
        WeakManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Current lifecycle phase
    pub fn state(&self) -> ProvState {
        self.inner.phase.borrow().state
    }

    /// True when no provisioning session is in progress
    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    /// Receive a copy of every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProvEvent> {
        self.inner.events.subscribe()
    }

    fn set_phase(&self, state: &mut ManagerState<S::Config>, phase: ProvState) {
        debug!(from = %state.phase, to = %phase, "Provisioning state transition");
        state.phase = phase;
        self.inner.phase.send_replace(PhaseSnapshot {
            generation: state.generation,
            state: phase,
        });
    }

    async fn lock(&self) -> MutexGuard<'_, ManagerState<S::Config>> {
        self.inner.state.lock().await
    }

    /// Keep the session alive after credential success
    ///
    /// `cleanup_delay_ms` is the grace period a later [`Self::stop`] waits
    /// before tearing the transport down, clamped to 100..=30000 ms.
    pub async fn disable_auto_stop(&self, cleanup_delay_ms: u32) -> ProvResult<()> {
        let mut state = self.lock().await;
        state.require(ProvState::Idle, "disable auto-stop")?;
        state.auto_stop = false;
        state.cleanup_delay = clamp_cleanup_delay(cleanup_delay_ms);
        debug!(delay = ?state.cleanup_delay, "Auto-stop disabled");
        Ok(())
    }

    /// Register application version info served on `proto-ver`
    pub async fn set_app_info(
        &self,
        label: &str,
        version: &str,
        capabilities: &[&str],
    ) -> ProvResult<()> {
        let mut state = self.lock().await;
        state.require(ProvState::Idle, "set app info")?;
        state.app_info.set(label, version, capabilities)
    }

    /// Reserve an application endpoint before the session starts
    pub async fn endpoint_create(&self, name: &str) -> ProvResult<u16> {
        let mut state = self.lock().await;
        state.require(ProvState::Idle, "create endpoint")?;
        let id = state.endpoints.create(name)?;
        debug!(name, id, "Endpoint created");
        Ok(id)
    }

    /// Bind a handler to a created endpoint of the running session
    pub async fn endpoint_register(
        &self,
        name: &str,
        handler: impl EndpointHandler,
    ) -> ProvResult<()> {
        let mut state = self.lock().await;
        state.require(ProvState::Active, "register endpoint")?;
        let session = state
            .session
            .clone()
            .ok_or_else(|| ProvError::invalid_state("register endpoint", "no session"))?;

        state.endpoints.mark_bound(name)?;
        session.bind(name, Arc::new(handler)).await;
        debug!(name, "Endpoint handler registered");
        Ok(())
    }

    /// Remove the handler of `name`; the reservation stays
    pub async fn endpoint_unregister(&self, name: &str) -> ProvResult<()> {
        let mut state = self.lock().await;
        state.require_initialized()?;
        if state.endpoints.mark_unbound(name) {
            if let Some(session) = &state.session {
                session.unbind(name).await;
            }
            debug!(name, "Endpoint handler unregistered");
        }
        Ok(())
    }

    /// Start a provisioning session
    ///
    /// Builds the scheme configuration, binds the built-in endpoints and
    /// brings the transport up. A transport failure leaves the manager idle.
    pub async fn start(
        &self,
        security: SecurityConfig,
        service_name: &str,
        service_key: Option<&str>,
    ) -> ProvResult<()> {
        let (generation, descriptors) = {
            let mut state = self.lock().await;
            state.require(ProvState::Idle, "start provisioning")?;
            if service_name.is_empty() {
                return Err(ProvError::InvalidArgument("empty service name".into()));
            }
            security.validate()?;

            state.generation += 1;
            self.set_phase(&mut state, ProvState::Starting);
            let descriptors: Vec<EndpointDescriptor> =
                state.endpoints.descriptors().cloned().collect();
            (state.generation, descriptors)
        };

        info!(
            service_name,
            security = security.version(),
            generation,
            "Starting provisioning"
        );

        self.inner.credentials.reset_all().await;
        self.inner.scanner.reset().await;
        let link_events = self.inner.network.link_events();

        let (config, session) = match self
            .launch(&security, service_name, service_key, &descriptors)
            .await
        {
            Ok(launched) => launched,
            Err(e) => {
                error!("Failed to start provisioning: {}", e);
                let mut state = self.lock().await;
                self.set_phase(&mut state, ProvState::Idle);
                return Err(e);
            }
        };

        let mut state = self.lock().await;
        for descriptor in descriptors.iter().filter(|d| d.builtin) {
            state.endpoints.mark_bound(&descriptor.name)?;
        }
        state.config = Some(config);
        state.session = Some(session);
        state.security = Some(security);
        state.monitor = Some(self.spawn_link_monitor(generation, link_events));
        self.set_phase(&mut state, ProvState::Active);
        state.emitter.emit(ProvEvent::Start);
        info!("Provisioning started");
        Ok(())
    }

    async fn launch(
        &self,
        security: &SecurityConfig,
        service_name: &str,
        service_key: Option<&str>,
        descriptors: &[EndpointDescriptor],
    ) -> ProvResult<(S::Config, Arc<ProtocolSession>)> {
        let scheme = &self.inner.scheme;
        let mut config = scheme.new_config()?;

        let configured = scheme
            .set_service_identity(&mut config, service_name, service_key)
            .and_then(|()| {
                descriptors
                    .iter()
                    .try_for_each(|d| scheme.set_endpoint(&mut config, &d.name, d.id))
            });
        if let Err(e) = configured {
            scheme.delete_config(config);
            return Err(e.into());
        }

        let session = Arc::new(ProtocolSession::new(
            security.session_layer(),
            descriptors.iter().map(|d| d.name.clone()),
        ));
        handlers::bind_builtin(self.downgrade(), &session).await;

        if let Err(e) = scheme.start(session.clone(), &config).await {
            session.clear().await;
            scheme.delete_config(config);
            return Err(ProvError::TransportFailure(e));
        }
        Ok((config, session))
    }

    fn spawn_link_monitor(
        &self,
        generation: u64,
        mut events: broadcast::Receiver<LinkEvent>,
    ) -> JoinHandle<()> {
        let manager = self.downgrade();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Link event monitor lagged by {} events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.on_link_event(generation, event).await;
            }
            debug!(generation, "Link event monitor finished");
        })
    }

    async fn on_link_event(&self, generation: u64, event: LinkEvent) {
        let mut state = self.lock().await;
        if state.generation != generation
            || !matches!(
                state.phase,
                ProvState::Active | ProvState::StoppingDeferred
            )
        {
            return;
        }

        let Some(outcome) = self.inner.credentials.on_link_event(event).await else {
            return;
        };
        let success = matches!(outcome, ProvEvent::CredentialSuccess(_));
        match &outcome {
            ProvEvent::CredentialFailed(reason) => warn!(?reason, "Connection attempt failed"),
            _ => info!("Connection established with received credentials"),
        }
        state.emitter.emit(outcome);

        if success && state.auto_stop && state.phase == ProvState::Active {
            // Linger until the client queried the outcome, at most the ceiling
            self.begin_deferred_stop(&mut state, MAX_STOP_DELAY);
            state.awaiting_status_query = true;
        }
    }

    /// The client was told the network is connected
    ///
    /// Replaces a lingering post-success stop with the cleanup delay, which
    /// leaves time to deliver the response.
    pub(crate) async fn connected_status_reported(&self) {
        let mut state = self.lock().await;
        if !state.awaiting_status_query || state.phase != ProvState::StoppingDeferred {
            return;
        }

        state.awaiting_status_query = false;
        state.stop_timer.cancel();
        let delay = state.cleanup_delay;
        self.arm_teardown(&mut state, delay);
        info!(?delay, "Outcome delivered to client, stopping provisioning");
    }

    /// Request the session to end
    ///
    /// Returns immediately; teardown happens after the cleanup delay, or
    /// right away when no request is in flight. A no-op unless active.
    pub async fn stop(&self) -> ProvResult<()> {
        let mut state = self.lock().await;
        state.require_initialized()?;
        if state.phase != ProvState::Active {
            debug!(state = %state.phase, "Stop request ignored");
            return Ok(());
        }

        let busy = state
            .session
            .as_ref()
            .is_some_and(|session| session.in_flight() > 0);
        let delay = if busy {
            state.cleanup_delay
        } else {
            Duration::ZERO
        };
        self.begin_deferred_stop(&mut state, delay);
        Ok(())
    }

    fn begin_deferred_stop(&self, state: &mut ManagerState<S::Config>, delay: Duration) {
        self.set_phase(state, ProvState::StoppingDeferred);
        self.arm_teardown(state, delay);
        info!(?delay, "Provisioning stop scheduled");
    }

    fn arm_teardown(&self, state: &mut ManagerState<S::Config>, delay: Duration) {
        let generation = state.generation;
        let manager = self.downgrade();
        state.stop_timer.arm(generation, delay, async move {
            if let Some(manager) = manager.upgrade() {
                manager.teardown(generation, false).await;
            }
        });
    }

    /// Stop the transport and return to idle
    ///
    /// Runs only for the session `generation` names. `forced` also tears
    /// down an active session and cancels a pending timer.
    async fn teardown(&self, generation: u64, forced: bool) -> bool {
        let (config, session) = {
            let mut state = self.lock().await;
            if state.generation != generation {
                debug!(generation, "Ignoring stop for a finished session");
                return false;
            }
            match state.phase {
                ProvState::StoppingDeferred => {}
                ProvState::Active if forced => {}
                _ => return false,
            }

            if forced {
                state.stop_timer.cancel();
            } else {
                state.stop_timer.take();
            }
            state.awaiting_status_query = false;
            if let Some(monitor) = state.monitor.take() {
                monitor.abort();
            }
            self.set_phase(&mut state, ProvState::Stopping);
            (state.config.take(), state.session.clone())
        };

        if let Some(session) = &session {
            match tokio::time::timeout(MAX_STOP_DELAY, self.inner.scheme.stop(session)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Transport stop failed, forcing cleanup: {}", e),
                Err(_) => warn!(
                    timeout = ?MAX_STOP_DELAY,
                    "Transport stop timed out, forcing cleanup"
                ),
            }
        }

        let mut state = self.lock().await;
        if let Some(session) = state.session.take() {
            session.clear().await;
        }
        state.endpoints.clear_bindings();
        state.security = None;
        if let Some(config) = config {
            self.inner.scheme.delete_config(config);
        }
        self.set_phase(&mut state, ProvState::Idle);
        state.emitter.emit(ProvEvent::End);
        info!("Provisioning stopped");
        true
    }

    /// Wait until the running session ends
    ///
    /// Returns immediately when no session is running.
    pub async fn wait(&self) {
        let mut phase = self.inner.phase.subscribe();
        let started = *phase.borrow_and_update();
        if !started.state.is_running() {
            return;
        }

        while phase.changed().await.is_ok() {
            let current = *phase.borrow_and_update();
            if current.generation != started.generation || !current.state.is_running() {
                return;
            }
        }
    }

    /// Tear down any running session and release the instance
    pub async fn deinit(&self) -> ProvResult<()> {
        loop {
            let mut phase = self.inner.phase.subscribe();
            let snapshot = *phase.borrow_and_update();
            match snapshot.state {
                ProvState::Uninitialized | ProvState::Deinitialized => {
                    return Err(ProvError::NotInitialized);
                }
                ProvState::Starting | ProvState::Stopping => {
                    // transition in progress on another task
                    let _ = phase.changed().await;
                }
                ProvState::Active | ProvState::StoppingDeferred => {
                    self.teardown(snapshot.generation, true).await;
                }
                ProvState::Idle => {
                    let mut state = self.lock().await;
                    if state.phase != ProvState::Idle {
                        continue;
                    }
                    state.stop_timer.cancel();
                    state.endpoints = EndpointRegistry::new();
                    state.app_info = AppInfoRegistry::new();
                    state.lease = None;
                    state.emitter.emit(ProvEvent::Deinit);
                    self.set_phase(&mut state, ProvState::Deinitialized);
                    info!("Provisioning manager deinitialized");
                    return Ok(());
                }
            }
        }
    }

    /// Apply credentials received over a channel of the application's own
    ///
    /// Same semantics as the `prov-config` endpoint: the call returns once
    /// the stack accepted the configuration; the outcome arrives as an event.
    pub async fn apply_credential(&self, credential: NetworkCredential) -> ProvResult<()> {
        let state = self.lock().await;
        state.require(ProvState::Active, "apply credentials")?;

        self.inner.credentials.apply(&credential).await?;
        info!(network = %credential.network_type(), "Credentials received");
        state.emitter.emit(ProvEvent::CredentialReceived(credential));
        Ok(())
    }

    pub async fn configure_wifi_sta(&self, config: WifiConfig) -> ProvResult<()> {
        self.apply_credential(NetworkCredential::Wifi(config)).await
    }

    pub async fn configure_thread_dataset(&self, dataset: ThreadDataset) -> ProvResult<()> {
        self.apply_credential(NetworkCredential::Thread(dataset))
            .await
    }

    /// Provisioning status of `network`; `NotReceived` outside a session
    pub async fn credential_status(&self, network: NetworkType) -> CredentialStatus {
        if !self.state().is_running() {
            return CredentialStatus::NotReceived;
        }
        self.inner.credentials.status(network).await
    }

    pub async fn link_state(&self, network: NetworkType) -> Option<LinkState> {
        if !self.state().is_running() {
            return None;
        }
        self.inner.credentials.link_state(network).await
    }

    /// Reason of the last failed connection attempt in this session
    pub async fn disconnect_reason(&self, network: NetworkType) -> Option<FailReason> {
        if !self.state().is_running() {
            return None;
        }
        self.inner.credentials.fail_reason(network).await
    }

    /// Whether the network stack holds persisted credentials
    pub async fn is_provisioned(&self, network: NetworkType) -> ProvResult<bool> {
        self.lock().await.require_initialized()?;
        Ok(self.inner.network.is_provisioned(network).await?)
    }

    /// Erase persisted credentials; refused while a session runs
    pub async fn reset_provisioning(&self, network: NetworkType) -> ProvResult<()> {
        let state = self.lock().await;
        state.require(ProvState::Idle, "reset provisioning")?;
        self.inner.network.erase(network).await?;
        info!(%network, "Persisted provisioning data erased");
        Ok(())
    }

    /// Abandon a failed or pending attempt so new credentials are accepted
    pub async fn reset_on_failure(&self, network: NetworkType) -> ProvResult<()> {
        let state = self.lock().await;
        state.require(ProvState::Active, "reset after failure")?;
        self.inner.credentials.reset_on_failure(network).await?;
        info!(%network, "Credential state reset after failure");
        Ok(())
    }

    /// Accept new credentials while keeping the transport alive
    ///
    /// Only with auto-stop disabled. A pending deferred stop is cancelled.
    pub async fn reset_for_reprovision(&self, network: NetworkType) -> ProvResult<()> {
        let mut state = self.lock().await;
        state.require_initialized()?;
        if state.auto_stop {
            return Err(ProvError::invalid_state(
                "reset for reprovisioning",
                "auto-stop enabled",
            ));
        }
        match state.phase {
            ProvState::Active => {}
            ProvState::StoppingDeferred => {
                state.stop_timer.cancel();
                state.awaiting_status_query = false;
                self.set_phase(&mut state, ProvState::Active);
                info!("Deferred stop cancelled for reprovisioning");
            }
            other => return Err(ProvError::invalid_state("reset for reprovisioning", other)),
        }

        self.inner.credentials.reset(network).await;
        self.inner.scanner.reset().await;
        info!(%network, "Ready for reprovisioning");
        Ok(())
    }

    /// Start a background Wi-Fi scan
    pub async fn start_scan(&self) -> ProvResult<()> {
        if !matches!(
            self.state(),
            ProvState::Active | ProvState::StoppingDeferred
        ) {
            return Err(ProvError::invalid_state("scan", self.state()));
        }
        self.inner.scanner.start_scan().await
    }

    pub async fn scan_status(&self) -> ScanStatus {
        self.inner.scanner.status().await
    }

    pub async fn scan_results(&self, start: usize, count: usize) -> ProvResult<Vec<WifiNetwork>> {
        self.inner.scanner.results(start, count).await
    }

    /// Run `f` over the discovery document
    pub(crate) async fn with_version_document<T>(
        &self,
        f: impl FnOnce(VersionDocument<'_>) -> T,
    ) -> ProvResult<T> {
        let state = self.lock().await;
        state.require_initialized()?;

        let security = state.security.as_ref();
        let mut cap: Vec<String> = security
            .map(|s| s.capabilities())
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        if self.inner.network.supports(NetworkType::Wifi) {
            cap.push("wifi_scan".to_string());
        }
        let prov = ProvInfo {
            ver: PROV_VERSION,
            sec_ver: security.map_or(0, SecurityConfig::version),
            sec_patch_ver: 0,
            cap,
        };
        Ok(f(state.app_info.document(&prov)))
    }
}
