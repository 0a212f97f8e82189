//! # meshnode - peer mesh node
//!
//! Every hit on `/` is either an operator status request or a payload from
//! another node. Peer payloads are authenticated (shared key id, bcrypt),
//! integrity-checked (MD5 over the field values), merged into the peer
//! registry and answered with this node's own signed metadata.
//!
//! ## Architecture
//! ```text
//! peer ──POST /──▶ Verifier ─▶ Envelope ─▶ Registry / Chain ─▶ answer
//!                                                │
//!                                                └──▶ relay to known peers
//!                                 Redis (State)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cluster;
mod config;
mod connection;
mod diagnostics;
mod envelope;
mod identity;
mod node;
mod output;
mod routes;
mod secure;
mod state;
mod storage;

use config::AppConfig;
use state::AppState;
use storage::StorageKind;

/// meshnode - authenticated peer mesh endpoint
#[derive(Parser, Debug)]
#[command(name = "meshnode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/meshnode.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Datastore backend (overrides config)
    #[arg(long, value_enum, env = "MESH_STORAGE")]
    storage: Option<StorageKind>,

    /// Public url of this node (overrides config)
    #[arg(long, env = "MESH_URL")]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting meshnode v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(config = %args.config, "Configuration loaded");

    let listen_addr = config.listen_addr.clone();

    // Initialize application state
    let state = AppState::new(config).await?;
    info!(
        url = %state.mesh.identity().url,
        storage = state.mesh.backend().name(),
        encryptor = state.mesh.encryptor().name(),
        "Node ready"
    );

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!("meshnode listening on {}", listen_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("meshnode shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
