//! Network stack abstraction layer

#[cfg(test)]
pub mod mock_backend;
pub mod network_stack;
pub mod wpa_supplicant;

pub use network_stack::NetworkStack;
pub use wpa_supplicant::WpaSupplicantStack;

#[cfg(test)]
pub use mock_backend::MockNetworkStack;
