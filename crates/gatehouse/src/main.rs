//! # Gatehouse - Bastion Challenge Gate
//!
//! Decides, for every request nginx forwards via `auth_request`, whether a
//! client must solve a CAPTCHA before being let through. Issues and
//! validates hashed bypass tokens, verifies solutions against the
//! configured third-party provider, and renders the challenge page.
//!
//! ## Architecture
//! ```text
//! Browser → Nginx → Gatehouse → Backend
//!                       ↓
//!                    Redis (State)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod bypass;
mod config;
mod gate;
mod page;
mod routes;
mod state;
mod store;
mod verifier;

use config::AppConfig;
use state::AppState;

/// Bastion Gatehouse - challenge gate for nginx auth_request
#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/gatehouse.toml")]
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
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!(
        "🛡️ Starting Bastion Gatehouse v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    info!("✅ Redis connected: {}", config.redis_url);

    // Spawn the periodic token purge sweep
    let purge_tokens = state.tokens.clone();
    let purge_redis = state.redis.clone();
    let purge_interval = config.purge.interval_secs;
    let purge_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        store::purge_worker(purge_tokens, purge_redis, purge_interval, purge_shutdown).await;
    });

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("🚀 Gatehouse listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("👋 Gatehouse shutdown complete");
    Ok(())
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
