//! Dispatcher entry point.

use anyhow::{Context, Result};
use chash_dispatcher::{Dispatcher, DispatcherConfig, DispatcherServer};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chash-dispatcher")]
#[command(about = "CHash dispatcher - consistent-hashing router for worker nodes")]
#[command(version)]
struct Cli {
    /// Config file (defaults to chash.toml in the current or a parent directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides listen_addr)
    #[arg(short, long)]
    listen: Option<String>,

    /// Worker executable used when create_node names none (overrides default_node_path)
    #[arg(long)]
    node_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config =
        DispatcherConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(node_path) = cli.node_path {
        config.default_node_path = Some(node_path);
    }

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr))?;

    info!(
        "Starting dispatcher ({} virtual nodes per worker)",
        config.virtual_nodes
    );
    let dispatcher = Arc::new(Dispatcher::new(config).context("Invalid configuration")?);
    let server = DispatcherServer::new(Arc::clone(&dispatcher));

    tokio::select! {
        served = server.start(addr) => {
            served.with_context(|| format!("Failed to serve on {}", addr))?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; stopping workers");
            dispatcher.shutdown("ctrl-c").await;
        }
    }

    info!("Dispatcher exited");
    Ok(())
}
