//! Pluggable transport abstraction

#[cfg(test)]
pub mod mock_scheme;
pub mod session;

use std::sync::Arc;
use trait_variant::make;

use crate::core::error::SchemeResult;

pub use session::ProtocolSession;

#[cfg(test)]
pub use mock_scheme::MockScheme;

/// Capability set every provisioning transport implements
///
/// The manager owns the configuration between [`Scheme::new_config`] and
/// [`Scheme::delete_config`] and never looks inside it.
#[make(Send)]
pub trait Scheme: Send + Sync + 'static {
    /// Transport specific session configuration
    type Config: Send + Sync + 'static;

    fn new_config(&self) -> SchemeResult<Self::Config>;

    fn delete_config(&self, config: Self::Config);

    /// Set the name clients discover the device by, and its optional key
    fn set_service_identity(
        &self,
        config: &mut Self::Config,
        name: &str,
        key: Option<&str>,
    ) -> SchemeResult<()>;

    /// Announce an endpoint and its stable identifier
    fn set_endpoint(&self, config: &mut Self::Config, name: &str, id: u16) -> SchemeResult<()>;

    /// Bring the transport up; requests go to `session`
    async fn start(&self, session: Arc<ProtocolSession>, config: &Self::Config)
    -> SchemeResult<()>;

    /// Tear the transport down
    async fn stop(&self, session: &ProtocolSession) -> SchemeResult<()>;
}
