mod config;
mod cors;
mod error;
mod handlers;
mod identity;
mod metrics;
mod models;
mod notifier;
mod rate_limit;
mod routes;
mod server;
mod state;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // parse cli arguments
    let args = Args::parse();
    tracing::info!("Relay starting, loading config from {}", args.config.display());

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        "Loaded {} route(s), listening on :{}",
        config.routes.len(),
        config.server.port
    );

    server::run(config).await
}
