//! Provisioning schemes over concrete transports

pub mod unix_socket;

pub use unix_socket::{SocketConfig, UnixSocketScheme};
