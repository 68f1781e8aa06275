//! Agent Ledger Service - HTTP API for agent credits
//!
//! This is the main entry point for the agent ledger service.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_ledger_service::{create_router, refill, AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agent_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Agent Ledger Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        store_backend = ?config.store_backend,
        admin_auth_enabled = config.admin_auth_enabled,
        refill_interval_seconds = config.refill_interval_seconds,
        "Service configuration loaded"
    );

    let state = AppState::open(config.clone())?;

    // Background refill
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = refill::spawn(Arc::new(state.clone()), shutdown_rx);

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(worker) = worker {
        worker.await?;
    }

    Ok(())
}
