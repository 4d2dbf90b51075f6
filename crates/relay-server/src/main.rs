//! # Relay Server
//!
//! Realtime change relay: pushes change-feed notifications to authenticated
//! WebSocket clients, partitioned by resource.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Override settings with environment variables
//! RELAY__PORT=8080 RELAY__HOST=0.0.0.0 RELAY__AUTH__ISSUER=https://id.example relay
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,relay_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path()? {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Path given with `--config`, if any.
fn config_path() -> Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => return Ok(Some(path)),
                None => bail!("--config requires a path"),
            },
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(None)
}
