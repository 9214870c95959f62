#![forbid(unsafe_code)]
//! railchain node: serves the ledger API and replicates with peers

use clap::Parser;
use railchain::api::run_api_server;
use railchain::config::{load_config, DEFAULT_CONFIG_PATH};
use railchain::node::Node;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "railchain-node", version, about = "Run a railchain ledger node")]
struct Args {
    /// Port to serve the API on; overrides `network.api_port`
    port: Option<u16>,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Peer URL to register at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for ctrl-c: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.network.api_port = port;
    }
    config.network.bootstrap_peers.extend(args.peers);

    let port = config.network.api_port;
    let bootstrap = config.network.bootstrap_peers.clone();

    let node = Arc::new(tokio::task::spawn_blocking(move || Node::init(config)).await??);
    info!(node = %node.identifier(), public_key = %node.public_key_hex(), "node ready");

    if !bootstrap.is_empty() {
        let peers = node.register_nodes(&bootstrap).await;
        info!(count = peers.len(), "bootstrap peers registered");
    }

    let shutdown_node = node.clone();
    run_api_server(node, port, async move {
        shutdown_signal().await;
        shutdown_node.shutdown().await;
    })
    .await?;

    info!("node stopped");
    Ok(())
}
