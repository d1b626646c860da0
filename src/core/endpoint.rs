//! Endpoint registry: name → identifier reservations and binding state

use futures::future::BoxFuture;
use std::future::Future;

use crate::core::{
    error::{EndpointResult, ProvError, ProvResult},
    types::SessionId,
};

/// Built-in control endpoint (reset / reprovision commands)
pub const EP_PROV_CTRL: &str = "prov-ctrl";
/// Built-in Wi-Fi scan endpoint
pub const EP_PROV_SCAN: &str = "prov-scan";
/// Built-in security session endpoint
pub const EP_PROV_SESSION: &str = "prov-session";
/// Built-in network configuration endpoint
pub const EP_PROV_CONFIG: &str = "prov-config";
/// Built-in version/capability discovery endpoint
pub const EP_PROTO_VER: &str = "proto-ver";

/// Built-in endpoints with their fixed identifiers
pub const BUILTIN_ENDPOINTS: [(&str, u16); 5] = [
    (EP_PROV_CTRL, 0xFF4F),
    (EP_PROV_SCAN, 0xFF50),
    (EP_PROV_SESSION, 0xFF51),
    (EP_PROV_CONFIG, 0xFF52),
    (EP_PROTO_VER, 0xFF53),
];

/// First identifier handed out to application endpoints
pub const CUSTOM_ENDPOINT_BASE: u16 = 0xFF54;

/// Handler for requests arriving on an endpoint
///
/// Any `Fn(SessionId, Vec<u8>) -> impl Future<Output = EndpointResult<Vec<u8>>>`
/// closure implements this; the closure's captures are the handler context.
pub trait EndpointHandler: Send + Sync + 'static {
    fn handle(
        &self,
        session_id: SessionId,
        request: Vec<u8>,
    ) -> BoxFuture<'static, EndpointResult<Vec<u8>>>;
}

impl<F, Fut> EndpointHandler for F
where
    F: Fn(SessionId, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EndpointResult<Vec<u8>>> + Send + 'static,
{
    fn handle(
        &self,
        session_id: SessionId,
        request: Vec<u8>,
    ) -> BoxFuture<'static, EndpointResult<Vec<u8>>> {
        Box::pin(self(session_id, request))
    }
}

/// Reserved endpoint slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub name: String,
    pub id: u16,
    pub builtin: bool,
}

#[derive(Debug)]
struct EndpointSlot {
    descriptor: EndpointDescriptor,
    bound: bool,
}

/// Registry of endpoint reservations
///
/// Phase rules (create before start, bind after start) are enforced by the
/// manager; the registry only guards uniqueness and binding state.
#[derive(Debug)]
pub struct EndpointRegistry {
    slots: Vec<EndpointSlot>,
    next_id: Option<u16>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        let slots = BUILTIN_ENDPOINTS
            .iter()
            .map(|(name, id)| EndpointSlot {
                descriptor: EndpointDescriptor {
                    name: name.to_string(),
                    id: *id,
                    builtin: true,
                },
                bound: false,
            })
            .collect();

        Self {
            slots,
            next_id: Some(CUSTOM_ENDPOINT_BASE),
        }
    }

    /// Reserve a slot for an application endpoint, returning its identifier
    pub fn create(&mut self, name: &str) -> ProvResult<u16> {
        if name.is_empty() {
            return Err(ProvError::InvalidArgument("empty endpoint name".into()));
        }
        if self.find(name).is_some() {
            return Err(ProvError::AlreadyExists(name.to_string()));
        }

        let id = self.next_id.ok_or(ProvError::NoMemory)?;
        self.next_id = id.checked_add(1);
        self.slots.push(EndpointSlot {
            descriptor: EndpointDescriptor {
                name: name.to_string(),
                id,
                builtin: false,
            },
            bound: false,
        });
        Ok(id)
    }

    /// Record that a handler is bound to `name`
    pub fn mark_bound(&mut self, name: &str) -> ProvResult<()> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.descriptor.name == name)
            .ok_or_else(|| ProvError::NotFound(name.to_string()))?;
        if slot.bound {
            return Err(ProvError::AlreadyBound(name.to_string()));
        }
        slot.bound = true;
        Ok(())
    }

    /// Clear the binding of `name`; returns whether it was bound
    pub fn mark_unbound(&mut self, name: &str) -> bool {
        match self.slots.iter_mut().find(|s| s.descriptor.name == name) {
            Some(slot) => std::mem::replace(&mut slot.bound, false),
            None => false,
        }
    }

    pub fn clear_bindings(&mut self) {
        for slot in &mut self.slots {
            slot.bound = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.descriptor.name == name && s.bound)
    }

    pub fn find(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.slots
            .iter()
            .map(|s| &s.descriptor)
            .find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.slots.iter().map(|s| &s.descriptor)
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
