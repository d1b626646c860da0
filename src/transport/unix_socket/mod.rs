//! Unix domain socket scheme

pub mod handler;
pub mod server;
pub mod session;

pub use {
    handler::RequestHandler,
    server::{SocketConfig, UnixSocketScheme},
    session::{SessionReader, UnixSocketSession},
};
