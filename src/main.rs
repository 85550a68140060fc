//! Arena Sync - headless peer and broadcast relay
//!
//! `arena-sync relay` runs the UDP relay with its HTTP health endpoint.
//! `arena-sync` (or `arena-sync peer`) runs a headless bot peer in the configured room,
//! offline when no relay credentials are set.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_sync::app::{run_peer, shutdown_signal, RelayState};
use arena_sync::config::{Config, RelayConfig};
use arena_sync::http::build_router;
use arena_sync::net::relay::RelayServer;
use arena_sync::util::time::init_process_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_process_time();

    match std::env::args().nth(1).as_deref() {
        Some("relay") => run_relay().await,
        Some("peer") | None => {
            let config = Config::from_env()?;
            init_tracing(&config.log_level);
            run_peer(config).await
        }
        Some(other) => anyhow::bail!("Unknown mode '{}', expected 'relay' or 'peer'", other),
    }
}

async fn run_relay() -> anyhow::Result<()> {
    let config = Arc::new(RelayConfig::from_env()?);
    init_tracing(&config.log_level);

    info!("Starting Arena Sync relay");
    info!("Relay address: {}", config.bind_addr);

    let state = RelayState::new(config.clone());
    let relay = RelayServer::bind(config.clone(), state.rooms.clone()).await?;
    let relay_task = tokio::spawn(relay.run());

    let router = build_router(state);
    let listener = TcpListener::bind(config.http_addr).await?;
    info!("Health check: http://{}/health", config.http_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    relay_task.abort();
    info!("Relay shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
