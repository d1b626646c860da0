//! Security configuration and the per-transport-session security layer
//!
//! The manager does not implement key exchange or encryption. It selects a
//! [`SessionSecurity`] for the session and gates endpoint access on it.

use sha3::{Digest, Sha3_256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    core::{
        error::{EndpointError, EndpointResult, ProvError, ProvResult},
        types::SessionId,
    },
    protocol::session::{SessionRequest, SessionResponse},
};

/// How long an established Sec1 session stays authorized
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Security layer bound to one provisioning session
///
/// `handshake` receives the raw payload of the `prov-session` endpoint.
pub trait SessionSecurity: Send + Sync {
    /// Protocol security version (0, 1 or 2)
    fn version(&self) -> u8;

    /// Process one handshake message from a transport session
    fn handshake(&self, session_id: SessionId, request: &[u8]) -> EndpointResult<Vec<u8>>;

    /// True once the transport session may access protected endpoints
    fn is_established(&self, session_id: SessionId) -> bool;

    /// Forget a transport session (client disconnected)
    fn close(&self, session_id: SessionId);
}

/// Parameters for SRP6a based security
///
/// The key exchange itself is furnished by `layer`.
pub struct Sec2Params {
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
    pub layer: Arc<dyn SessionSecurity>,
}

impl std::fmt::Debug for Sec2Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sec2Params")
            .field("salt_len", &self.salt.len())
            .field("verifier_len", &self.verifier.len())
            .finish()
    }
}

/// Security mode for a provisioning session
///
/// Parameters are shared, not copied; they are released when the session
/// stops.
#[derive(Debug, Clone)]
pub enum SecurityConfig {
    /// Plain-text communication
    Sec0,
    /// Proof-of-possession handshake; `None` means no pop is required
    Sec1 { pop: Option<Arc<str>> },
    /// Password-authenticated key exchange
    Sec2(Arc<Sec2Params>),
}

impl SecurityConfig {
    pub fn version(&self) -> u8 {
        match self {
            SecurityConfig::Sec0 => 0,
            SecurityConfig::Sec1 { .. } => 1,
            SecurityConfig::Sec2(_) => 2,
        }
    }

    pub fn validate(&self) -> ProvResult<()> {
        match self {
            SecurityConfig::Sec0 => Ok(()),
            SecurityConfig::Sec1 { pop: Some(pop) } if pop.is_empty() => Err(
                ProvError::InvalidArgument("proof of possession must not be empty".into()),
            ),
            SecurityConfig::Sec1 { .. } => Ok(()),
            SecurityConfig::Sec2(params) => {
                if params.salt.is_empty() || params.verifier.is_empty() {
                    return Err(ProvError::InvalidArgument(
                        "security 2 requires salt and verifier".into(),
                    ));
                }
                if params.layer.version() != 2 {
                    return Err(ProvError::InvalidArgument(
                        "security 2 layer reports wrong version".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Capability flags advertised in the `prov` discovery entry
    pub fn capabilities(&self) -> Vec<&'static str> {
        match self {
            SecurityConfig::Sec0 => vec!["no_sec"],
            SecurityConfig::Sec1 { pop: None } => vec!["no_pop"],
            _ => vec![],
        }
    }

    pub(crate) fn session_layer(&self) -> Arc<dyn SessionSecurity> {
        match self {
            SecurityConfig::Sec0 => Arc::new(Unsecured),
            SecurityConfig::Sec1 { pop } => Arc::new(PopVerifier::new(pop.clone())),
            SecurityConfig::Sec2(params) => params.layer.clone(),
        }
    }
}

/// Security 0: every transport session is trusted
#[derive(Debug)]
pub struct Unsecured;

impl SessionSecurity for Unsecured {
    fn version(&self) -> u8 {
        0
    }

    fn handshake(&self, _session_id: SessionId, _request: &[u8]) -> EndpointResult<Vec<u8>> {
        Ok(serde_json::to_vec(&SessionResponse::ok())?)
    }

    fn is_established(&self, _session_id: SessionId) -> bool {
        true
    }

    fn close(&self, _session_id: SessionId) {}
}

/// Security 1 verifier
///
/// Clients prove possession by sending SHA3-256(pop), hex encoded.
/// Authorization expires after 5 minutes.
#[derive(Debug)]
pub struct PopVerifier {
    pop: Option<Arc<str>>,
    authorized: Mutex<HashMap<SessionId, Instant>>,
}

impl PopVerifier {
    pub fn new(pop: Option<Arc<str>>) -> Self {
        Self {
            pop,
            authorized: Mutex::new(HashMap::new()),
        }
    }

    /// Compute the proof a client must present for `pop`
    pub fn proof_for(pop: &str) -> [u8; 32] {
        let mut hasher = Sha3_256::new();
        hasher.update(pop.as_bytes());
        hasher.finalize().into()
    }

    fn verify(&self, proof: &[u8]) -> bool {
        let Some(pop) = &self.pop else {
            return true;
        };
        let expected = Self::proof_for(pop);
        proof.len() == expected.len()
            && proof
                .iter()
                .zip(expected.iter())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl SessionSecurity for PopVerifier {
    fn version(&self) -> u8 {
        1
    }

    fn handshake(&self, session_id: SessionId, request: &[u8]) -> EndpointResult<Vec<u8>> {
        let request: SessionRequest = serde_json::from_slice(request)?;
        let proof = match request.proof.as_deref() {
            Some(hex_proof) => hex::decode(hex_proof)
                .map_err(|e| EndpointError::InvalidRequest(format!("invalid proof: {}", e)))?,
            None => Vec::new(),
        };

        if !self.verify(&proof) {
            warn!(%session_id, "Proof of possession rejected");
            return Err(EndpointError::Unauthorized);
        }

        let expires_at = Instant::now() + AUTHORIZATION_TIMEOUT;
        self.authorized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, expires_at);
        debug!(%session_id, "Security session established");

        Ok(serde_json::to_vec(&SessionResponse::ok())?)
    }

    fn is_established(&self, session_id: SessionId) -> bool {
        self.authorized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .is_some_and(|expires_at| Instant::now() < *expires_at)
    }

    fn close(&self, session_id: SessionId) {
        self.authorized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_request(proof: Option<&[u8]>) -> Vec<u8> {
        serde_json::to_vec(&SessionRequest {
            proof: proof.map(hex::encode),
        })
        .unwrap()
    }

    struct FakeSrp;

    impl SessionSecurity for FakeSrp {
        fn version(&self) -> u8 {
            2
        }
        fn handshake(&self, _id: SessionId, _request: &[u8]) -> EndpointResult<Vec<u8>> {
            Ok(vec![])
        }
        fn is_established(&self, _id: SessionId) -> bool {
            false
        }
        fn close(&self, _id: SessionId) {}
    }

    #[test]
    fn test_unsecured_always_established() {
        let layer = SecurityConfig::Sec0.session_layer();
        assert_eq!(layer.version(), 0);
        assert!(layer.is_established(SessionId::new()));
    }

    #[tokio::test]
    async fn test_pop_verifier_success() {
        let verifier = PopVerifier::new(Some(Arc::from("abcd1234")));
        let id = SessionId::new();
        assert!(!verifier.is_established(id));

        let proof = PopVerifier::proof_for("abcd1234");
        verifier.handshake(id, &handshake_request(Some(&proof))).unwrap();
        assert!(verifier.is_established(id));

        // Other transport sessions stay unauthorized
        assert!(!verifier.is_established(SessionId::new()));

        verifier.close(id);
        assert!(!verifier.is_established(id));
    }

    #[tokio::test]
    async fn test_pop_verifier_wrong_proof() {
        let verifier = PopVerifier::new(Some(Arc::from("abcd1234")));
        let id = SessionId::new();

        let result = verifier.handshake(id, &handshake_request(Some(&[0u8; 32])));
        assert_eq!(result, Err(EndpointError::Unauthorized));

        let result = verifier.handshake(id, &handshake_request(Some(&[0u8; 16])));
        assert_eq!(result, Err(EndpointError::Unauthorized));
        assert!(!verifier.is_established(id));
    }

    #[tokio::test]
    async fn test_pop_verifier_without_pop() {
        let verifier = PopVerifier::new(None);
        let id = SessionId::new();
        verifier.handshake(id, &handshake_request(None)).unwrap();
        assert!(verifier.is_established(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_authorization_expires() {
        let verifier = PopVerifier::new(None);
        let id = SessionId::new();
        verifier.handshake(id, &handshake_request(None)).unwrap();

        tokio::time::advance(AUTHORIZATION_TIMEOUT + Duration::from_secs(1)).await;
        assert!(!verifier.is_established(id));
    }

    #[test]
    fn test_security_validation_and_capabilities() {
        assert!(SecurityConfig::Sec0.validate().is_ok());
        assert_eq!(SecurityConfig::Sec0.capabilities(), vec!["no_sec"]);

        let empty_pop = SecurityConfig::Sec1 {
            pop: Some(Arc::from("")),
        };
        assert!(empty_pop.validate().is_err());
        assert_eq!(
            SecurityConfig::Sec1 { pop: None }.capabilities(),
            vec!["no_pop"]
        );

        let sec2 = SecurityConfig::Sec2(Arc::new(Sec2Params {
            salt: vec![1, 2, 3],
            verifier: vec![4, 5, 6],
            layer: Arc::new(FakeSrp),
        }));
        assert!(sec2.validate().is_ok());
        assert_eq!(sec2.version(), 2);
        assert!(sec2.capabilities().is_empty());

        let missing_salt = SecurityConfig::Sec2(Arc::new(Sec2Params {
            salt: vec![],
            verifier: vec![4],
            layer: Arc::new(FakeSrp),
        }));
        assert!(missing_salt.validate().is_err());
    }
}
