//! Runtime settings

use std::{sync::Arc, time::Duration};
use thiserror::Error;

use crate::{
    config::CliArgs,
    core::{security::SecurityConfig, timer::clamp_cleanup_delay},
};

/// Invalid command-line configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid socket mode '{0}', expected octal permissions")]
    InvalidSocketMode(String),

    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("Proof of possession requires security level 1")]
    PopWithoutSecurity,

    #[error("Proof of possession must not be empty")]
    EmptyPop,
}

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub interface: String,
    pub socket_path: String,
    pub socket_mode: u32,
    pub service_name: String,
    pub service_key: Option<String>,
    pub security: SecurityConfig,
    pub auto_stop: bool,
    pub cleanup_delay: Duration,
}

impl TryFrom<CliArgs> for Settings {
    type Error = SettingsError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let socket_mode = u32::from_str_radix(&args.socket_mode, 8)
            .ok()
            .filter(|mode| *mode <= 0o777)
            .ok_or_else(|| SettingsError::InvalidSocketMode(args.socket_mode.clone()))?;

        if args.service_name.is_empty() {
            return Err(SettingsError::EmptyServiceName);
        }

        let security = match (args.security, args.pop) {
            (0, Some(_)) => return Err(SettingsError::PopWithoutSecurity),
            (0, None) => SecurityConfig::Sec0,
            (_, Some(pop)) if pop.is_empty() => return Err(SettingsError::EmptyPop),
            (_, pop) => SecurityConfig::Sec1 {
                pop: pop.map(Arc::from),
            },
        };

        Ok(Settings {
            interface: args.interface,
            socket_path: args.socket_path,
            socket_mode,
            service_name: args.service_name,
            service_key: args.service_key,
            security,
            auto_stop: !args.disable_auto_stop,
            cleanup_delay: clamp_cleanup_delay(args.cleanup_delay_ms),
        })
    }
}

impl Settings {
    /// Cleanup delay in milliseconds as accepted by the manager
    pub fn cleanup_delay_ms(&self) -> u32 {
        u32::try_from(self.cleanup_delay.as_millis()).unwrap_or(u32::MAX)
    }
}
