//! Access Token Server
//!
//! Single-binary service that:
//! 1. Loads app credentials from TOML config
//! 2. Seeds one token holder per app from `<app_home>/token.json`
//! 3. Keeps every token refreshed ahead of expiry on its own loop
//! 4. Serves cached tokens on `GET /api/v1/token?appId=..`
//! 5. Persists all tokens on SIGINT/SIGTERM before exiting

mod api;
mod config;
mod error;
mod home;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use token_pool::{DiskStore, TokenHolder, TokenPool};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wechat_auth::TokenClient;

use crate::api::AppState;
use crate::config::Config;

/// Upper bound on draining in-flight requests after the shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL, then RUST_LOG, default info
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting token-server");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let default_home = home::default_app_home();
    let config_path = Config::resolve_path(cli_config_path, default_home.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let app_home: PathBuf = config
        .token
        .state_dir
        .clone()
        .or(default_home)
        .context("no home directory found; set [token] state_dir")?;
    home::ensure_app_home(&app_home)
        .with_context(|| format!("failed to prepare app home {}", app_home.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        endpoint = %config.token.endpoint,
        app_home = %app_home.display(),
        apps = config.credentials.len(),
        check_interval_secs = config.token.check_interval_secs,
        refresh_threshold_secs = config.token.refresh_threshold_secs,
        "configuration loaded"
    );

    let client =
        TokenClient::with_timeout(config.token.endpoint.clone(), config.token.request_timeout())
            .context("failed to build token client")?;
    let store = Arc::new(DiskStore::new(home::token_file(&app_home)));
    let pool = Arc::new(TokenPool::new(store));

    let settings = config.token.refresh_settings();
    for credential in config.credentials {
        let app_id = credential.app_id.clone();
        pool.put(TokenHolder::new(credential, client.clone(), settings))
            .await
            .with_context(|| format!("failed to register app {app_id}"))?;
    }
    pool.start_all().await;

    let app = api::build_router(
        AppState {
            pool: pool.clone(),
            prometheus: prometheus_handle,
        },
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the signal fires, not when the server
    // starts: notify the server to drain, then race it against the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // Persist tokens and stop every refresh loop first; lookups keep being
    // answered from the in-memory records while the server drains.
    if let Err(e) = pool.close().await {
        error!(error = %e, "tokens not persisted on shutdown");
    }

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
