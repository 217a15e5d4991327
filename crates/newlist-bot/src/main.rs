//! New-listing bot - Entry Point
//!
//! Watches the exchange ticker feed for symbols that were not listed at
//! startup and buys each new listing once, through the risk gate.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

/// Status log interval.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// New-listing detection and execution bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via NEWLIST_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection
    newlist_ws::init_crypto();

    let args = Args::parse();

    newlist_telemetry::init_logging()?;

    info!("Starting newlist-bot v{}", env!("CARGO_PKG_VERSION"));

    let config_path = newlist_bot::AppConfig::resolve_path(args.config);
    info!(config_path = %config_path, "Loading configuration");

    let config = newlist_bot::AppConfig::from_file(&config_path)?;
    let credentials = config.load_credentials()?;
    info!(
        mode = %config.mode,
        ws_url = %config.ws.url,
        rest_url = %config.rest.url,
        poll_enabled = config.rest.poll_enabled,
        persistent = config.persistence.database_url.is_some(),
        "Configuration loaded"
    );

    let service = newlist_bot::ListingService::from_config(config, credentials).await?;
    service.start().await;

    let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
    status_timer.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = status_timer.tick() => {
                let status = service.status();
                info!(
                    health = %status.health,
                    state = %status.connection_state,
                    reconnect_attempts = status.reconnect_attempts,
                    uptime_secs = status.uptime_secs,
                    listings_detected = status.listings_detected,
                    last_error = status.last_error.as_deref().unwrap_or(""),
                    "Service status"
                );
                if status.reconnect_exhausted {
                    warn!("Feed reconnect budget spent, relying on REST poll fallback");
                }
            }
        }
    }

    let unresolved = service.stop().await;
    if unresolved > 0 {
        warn!(unresolved, "Exiting with unresolved order submissions");
    }
    Ok(())
}
