//! JSON-RPC request handler for the Unix socket scheme

use std::sync::Arc;
use tracing::debug;

use crate::{
    core::types::SessionId,
    protocol::{
        CallParams, CallResponse, EndpointsResponse, JsonRpcError, JsonRpcRequest,
        JsonRpcResponse, ServiceInfoResponse, SocketRequest, SocketResponse,
    },
    scheme::ProtocolSession,
    transport::unix_socket::server::SocketConfig,
};

/// Maps socket requests onto the provisioning session
pub struct RequestHandler {
    session: Arc<ProtocolSession>,
    config: Arc<SocketConfig>,
}

impl RequestHandler {
    pub fn new(session: Arc<ProtocolSession>, config: Arc<SocketConfig>) -> Self {
        Self { session, config }
    }

    pub async fn handle_request(
        &self,
        session_id: SessionId,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = request.id;
        let result = match request.request {
            SocketRequest::Call(params) => self.handle_call(session_id, params).await,
            SocketRequest::ListEndpoints => Ok(self.handle_list_endpoints()),
            SocketRequest::ServiceInfo => Ok(self.handle_service_info()),
        };

        match result {
            Ok(response) => JsonRpcResponse::success(response, id),
            Err(error) => JsonRpcResponse::error(error, id),
        }
    }

    /// Drop security state of a disconnected client
    pub fn close_session(&self, session_id: SessionId) {
        self.session.close_transport_session(session_id);
    }

    async fn handle_call(
        &self,
        session_id: SessionId,
        params: CallParams,
    ) -> Result<SocketResponse, JsonRpcError> {
        let payload = hex::decode(&params.payload)
            .map_err(|e| JsonRpcError::invalid_params(format!("payload is not hex: {}", e)))?;
        debug!(%session_id, endpoint = %params.endpoint, "Socket call");

        let response = self
            .session
            .dispatch(session_id, &params.endpoint, payload)
            .await?;
        Ok(SocketResponse::Call(CallResponse {
            payload: hex::encode(response),
        }))
    }

    fn handle_list_endpoints(&self) -> SocketResponse {
        SocketResponse::Endpoints(EndpointsResponse {
            endpoints: self.config.endpoints.clone(),
        })
    }

    fn handle_service_info(&self) -> SocketResponse {
        SocketResponse::ServiceInfo(ServiceInfoResponse {
            service_name: self.config.service_name.clone(),
            security_version: self.session.security_version(),
            key_required: self.config.service_key.is_some(),
        })
    }
}
