//! Mock scheme for testing

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::{
    core::{
        error::{EndpointResult, SchemeError, SchemeResult},
        types::SessionId,
    },
    scheme::{ProtocolSession, Scheme},
};

/// Configuration recorded by the mock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockConfig {
    pub service_name: String,
    pub service_key: Option<String>,
    pub endpoints: Vec<(String, u16)>,
}

#[derive(Debug, Default)]
struct MockSchemeState {
    calls: Vec<&'static str>,
    fail_start: bool,
    fail_stop: bool,
    hang_stop: bool,
    live_configs: usize,
    started_config: Option<MockConfig>,
    session: Option<Arc<ProtocolSession>>,
}

/// Scheme recording every capability call
///
/// While started, tests act as a client through [`MockScheme::call`].
#[derive(Debug, Clone, Default)]
pub struct MockScheme {
    inner: Arc<Mutex<MockSchemeState>>,
}

impl MockScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state().fail_stop = fail;
    }

    /// Make `stop` never complete
    pub fn set_hang_stop(&self, hang: bool) {
        self.state().hang_stop = hang;
    }

    /// Capability calls in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    /// Configurations created and not yet deleted
    pub fn live_configs(&self) -> usize {
        self.state().live_configs
    }

    /// Configuration the transport was last started with
    pub fn started_config(&self) -> Option<MockConfig> {
        self.state().started_config.clone()
    }

    /// Session of the running transport
    pub fn session(&self) -> Option<Arc<ProtocolSession>> {
        self.state().session.clone()
    }

    /// Send a JSON request to `endpoint` as client `session_id`
    pub async fn call(
        &self,
        session_id: SessionId,
        endpoint: &str,
        request: &impl Serialize,
    ) -> EndpointResult<serde_json::Value> {
        let session = self
            .session()
            .ok_or_else(|| crate::core::error::EndpointError::Rejected("not started".into()))?;
        let payload = serde_json::to_vec(request)?;
        let response = session.dispatch(session_id, endpoint, payload).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockSchemeState> {
        self.inner.lock().unwrap()
    }
}

impl Scheme for MockScheme {
    type Config = MockConfig;

    fn new_config(&self) -> SchemeResult<MockConfig> {
        let mut state = self.state();
        state.calls.push("new_config");
        state.live_configs += 1;
        Ok(MockConfig::default())
    }

    fn delete_config(&self, _config: MockConfig) {
        let mut state = self.state();
        state.calls.push("delete_config");
        state.live_configs -= 1;
    }

    fn set_service_identity(
        &self,
        config: &mut MockConfig,
        name: &str,
        key: Option<&str>,
    ) -> SchemeResult<()> {
        self.state().calls.push("set_service_identity");
        config.service_name = name.to_string();
        config.service_key = key.map(str::to_string);
        Ok(())
    }

    fn set_endpoint(&self, config: &mut MockConfig, name: &str, id: u16) -> SchemeResult<()> {
        self.state().calls.push("set_endpoint");
        config.endpoints.push((name.to_string(), id));
        Ok(())
    }

    async fn start(&self, session: Arc<ProtocolSession>, config: &MockConfig) -> SchemeResult<()> {
        let mut state = self.state();
        state.calls.push("start");
        if state.fail_start {
            return Err(SchemeError::Protocol("mock start failure".into()));
        }
        state.started_config = Some(config.clone());
        state.session = Some(session);
        Ok(())
    }

    async fn stop(&self, _session: &ProtocolSession) -> SchemeResult<()> {
        let (fail, hang) = {
            let mut state = self.state();
            state.calls.push("stop");
            state.session = None;
            (state.fail_stop, state.hang_stop)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(SchemeError::Protocol("mock stop failure".into()));
        }
        Ok(())
    }
}
