//! Worker node entry point.
//!
//! Spawned by the dispatcher as `chash-node --port=<port>`.

use anyhow::{Context, Result};
use chash_node::NodeServer;
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chash-node")]
#[command(about = "CHash worker node - in-memory entity store")]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;

    tracing::info!(pid = std::process::id(), "Starting worker node on {}", addr);
    NodeServer::default()
        .start(addr)
        .await
        .with_context(|| format!("Failed to serve on {}", addr))?;

    Ok(())
}
