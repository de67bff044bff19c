//! # rollcall-server
//!
//! HTTP server for the rollcall attendance system.
//!
//! This binary provides:
//! - REST API for participant registration and attendance sessions
//! - OpenAPI document at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development (simulated discovery)
//! cargo run --package rollcall-server
//!
//! # Production (on a Linux host with BlueZ)
//! ROLLCALL_CONFIG=/etc/rollcall/config.toml ./rollcall-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use rollcall_core::{default_config_path, Config};
use rollcall_server::logging::{self, LogSettings};
use rollcall_server::{api, state::AppState};
use tokio::net::TcpListener;
use tracing::info;

/// Environment variable overriding the configuration file location.
const CONFIG_PATH_ENV: &str = "ROLLCALL_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(default_config_path, PathBuf::from);

    // Configuration comes first: it decides how logging is set up
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    logging::init(&LogSettings::from_env(&config.system))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting rollcall-server"
    );

    let bind_address = config.system.bind_address.clone();
    let state = AppState::from_config(config).await?.into_shared();
    let app = api::create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
