//! TURN relay server
//!
//! Serves STUN/TURN over UDP on the configured interfaces, authenticating
//! against the static credential store from `TURN_USERS`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use turn_config::TurnConfig;
use turn_core::{EventNotifier, Service};
use turn_server::RelayServer;

const EVENT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = TurnConfig::from_env().context("Failed to load configuration")?;

    // Initialize logging
    turn_logging::init("turn-server", config.log_level(), config.log_format);

    info!(
        realm = %config.realm,
        interfaces = config.interfaces.len(),
        users = config.users.len(),
        "Configuration loaded"
    );
    if config.users.is_empty() {
        warn!("No users configured; every authenticated request will be rejected");
    }

    let (events, receiver) = EventNotifier::channel(EVENT_CAPACITY);
    let service = Service::new(
        config.to_service_options(),
        Arc::new(config.credentials()),
        events,
    );

    let server = RelayServer::bind(service.clone(), receiver, &config.interfaces)
        .await
        .context("Failed to bind interfaces")?
        .with_max_pending_requests(config.max_pending_requests)
        .with_reconcile_interval(config.sweep_interval);

    let sweeper = service.spawn_sweeper(config.sweep_interval);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Relay server error");
        }
    });

    // Wait for shutdown signal
    info!("TURN server running. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    server_handle.abort();
    sweeper.abort();
    info!(allocations = service.table().len(), "TURN server stopped");

    Ok(())
}
