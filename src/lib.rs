//! Network provisioning manager
//!
//! Drives a provisioning session from start to teardown: a pluggable
//! transport ([`scheme::Scheme`]) carries client requests to named
//! endpoints, received credentials are handed to the [`backend::NetworkStack`],
//! and the outcome is reported as ordered [`core::event::ProvEvent`]s.
//!
//! Transports shipped with the crate:
//! - Unix Domain Sockets (JSON-RPC 2.0)

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod scheme;
pub mod transport;

pub use core::{
    error::{EndpointError, NetworkError, ProvError, SchemeError},
    event::{EventHandler, ProvEvent},
    manager::{InstanceSlot, ProvisioningManager},
    security::SecurityConfig,
    types::{CredentialStatus, NetworkCredential, NetworkType, ProvState, WifiNetwork},
};
