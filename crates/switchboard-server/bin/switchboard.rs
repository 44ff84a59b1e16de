//! Switchboard chat server binary entry point.
//!
//! Thin wrapper around the switchboard-server library that initializes
//! logging, loads configuration and runs the server until Ctrl-C.

use anyhow::Result;
use switchboard_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Switchboard chat server starting...");

    let config = ServerConfig::from_args();

    tracing::info!(
        "Configuration loaded: bind={}, users={:?}, sessions={}, workers={}",
        config.bind,
        config.users,
        config.max_sessions,
        config.workers
    );

    config.validate()?;

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
