//! mtcp-backend: a static HTTP backend for MTCP testing
//!
//! Listens on 127.0.0.1:9000 and answers every connection with the same
//! HTML page, stamped with the current local time. Each connection is
//! served by its own task and closed after one response.
//!
//! Features:
//! - SO_REUSEADDR listener, so restarts do not fail with address-in-use
//! - One independent task per connection, no shared state
//! - Log level via CLI argument, TOML file, or `RUST_LOG`

mod config;
mod response;
mod server;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(listen = %config.listen, "Starting mtcp-backend");

    let server = Server::bind(config.listen).map_err(|e| {
        error!(address = %config.listen, error = %e, "Failed to bind listener");
        e
    })?;

    server.run().await.map_err(|e| {
        error!(error = %e, "Listener stopped");
        e
    })?;

    Ok(())
}
