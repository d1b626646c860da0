//! Core business logic module

pub mod app_info;
pub mod credential;
pub mod endpoint;
pub mod error;
pub mod event;
pub(crate) mod handlers;
pub mod manager;
pub mod scanner;
pub mod security;
pub mod timer;
pub mod types;
