//! Filedrop Server
//!
//! Receives files from remote clients as base64 payloads, chunked transfers
//! or AES-encrypted archives and writes them under the configured storage root.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filedrop_server::config::Config;
use filedrop_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG may come from .env
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "filedrop_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting Filedrop Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage directory: {}", config.storage.content_root.display());
    tracing::info!("Chunks directory: {}", config.storage.chunk_root.display());

    let state = AppState::new(config.clone()).context("Failed to initialize application state")?;

    // Idle session sweeper
    let sweeper = state.ingest().clone();
    let idle_timeout = config.sessions.idle_timeout;
    // interval() rejects a zero period
    let period = config.sessions.sweep_interval.max(std::time::Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            let ingest = sweeper.clone();
            match tokio::task::spawn_blocking(move || ingest.sweep_idle(idle_timeout)).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Removed idle upload sessions"),
                Err(e) => tracing::warn!("Session sweep failed: {}", e),
            }
        }
    });

    let app = filedrop_server::app(state);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST: {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Filedrop Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
