//! Network provisioning service - Main Entry Point

use clap::Parser;
use listenfd::ListenFd;
use network_provisioning::{
    backend::WpaSupplicantStack,
    config::{CliArgs, Settings},
    core::{event::ProvEvent, manager::ProvisioningManager},
    transport::UnixSocketScheme,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,network_provisioning=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting network provisioning service");

    let settings = match Settings::try_from(args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let network = WpaSupplicantStack::new(settings.interface.clone()).await?;
    info!("Network stack initialized for interface: {}", settings.interface);

    let mut scheme =
        UnixSocketScheme::new(&settings.socket_path).with_socket_mode(settings.socket_mode);
    if let Some(listener) = ListenFd::from_env().take_unix_listener(0)? {
        info!("Using socket passed by the service manager");
        scheme = scheme.with_listener(listener);
    }
    let scheme_events = scheme.event_handler();

    let manager = ProvisioningManager::init(
        scheme,
        network,
        Some(scheme_events),
        Some(Arc::new(log_event)),
    )?;
    if !settings.auto_stop {
        manager
            .disable_auto_stop(settings.cleanup_delay_ms())
            .await?;
    }

    manager
        .start(
            settings.security.clone(),
            &settings.service_name,
            settings.service_key.as_deref(),
        )
        .await?;

    notify_ready();
    info!("Service started successfully");

    // Wait for the session to end or a shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        _ = manager.wait() => {
            info!("Provisioning session ended");
        }
    }

    info!("Shutting down...");
    if let Err(e) = manager.deinit().await {
        warn!("Deinit failed: {}", e);
    }
    Ok(())
}

fn log_event(event: &ProvEvent) {
    match event {
        ProvEvent::CredentialFailed(reason) => warn!(?reason, "Provisioning failed"),
        ProvEvent::CredentialSuccess(network) => info!(%network, "Provisioning successful"),
        _ => info!(event = event.name(), "Provisioning event"),
    }
}

#[cfg(feature = "systemd")]
fn notify_ready() {
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        warn!("Failed to notify service manager: {}", e);
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_ready() {}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
