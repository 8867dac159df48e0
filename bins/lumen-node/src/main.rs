//! Lumen node binary.
//!
//! Mirrors an origin node's chain into a local RocksDB cache, optionally
//! publishes finalized blocks as gzip chunks, and serves the cache over
//! JSON-RPC and plain HTTP.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_node_lib::http::serve_http;
use lumen_node_lib::{start_rpc_server, Node, NodeConfig};
use tokio::sync::oneshot;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "lumen-node",
    version,
    about = "Light-client block cache, chunk publisher and query server"
)]
struct Args {
    /// TOML config file. Missing files are ignored.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Data directory for the block cache and local chunks
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Blocks behind the head before a block counts as final
    #[arg(long)]
    finality_depth: Option<u64>,

    /// JSON-RPC bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// JSON-RPC port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// HTTP API bind address
    #[arg(long)]
    http_bind: Option<String>,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Origin node host
    #[arg(long)]
    origin_host: Option<String>,

    /// Origin node port
    #[arg(long)]
    origin_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Serve from the cache only; do not follow the origin.
    #[arg(long)]
    no_follower: bool,

    /// Publish finalized blocks as chunks.
    #[arg(long)]
    publish: bool,
}

impl Args {
    /// Load the layered config and apply CLI overrides on top.
    fn into_config(self) -> Result<NodeConfig> {
        let mut config = NodeConfig::load(self.config.as_deref()).context("loading config")?;

        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(depth) = self.finality_depth {
            config.finality_depth = depth;
        }
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(bind) = self.http_bind {
            config.http_bind = bind;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(host) = self.origin_host {
            config.origin.host = host;
        }
        if let Some(port) = self.origin_port {
            config.origin.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if self.no_follower {
            config.follower.enabled = false;
        }
        if self.publish {
            config.publisher.enabled = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.log_level, &config.log_format);

    info!("Lumen node v{}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = %config.data_dir.display(), origin = %config.origin.base_url(), "configuration loaded");

    let rpc_addr = config.rpc_addr().context("parsing RPC address")?;
    let http_addr = config.http_addr().context("parsing HTTP address")?;

    let node = Node::new(config).context("starting node")?;

    let (rpc_bound, rpc_handle) = start_rpc_server(rpc_addr, node.query())
        .await
        .context("starting RPC server")?;
    info!(addr = %rpc_bound, "RPC server listening");

    let (stop_http, http_stopped) = oneshot::channel::<()>();
    let http_task = tokio::spawn(serve_http(http_addr, node.query(), async {
        http_stopped.await.ok();
    }));

    let background = node.spawn_background();
    info!("Lumen node running (Ctrl+C to stop)");

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl+C handler")?;
    info!("received Ctrl+C, shutting down");

    for task in background {
        task.abort();
    }
    rpc_handle.stop().ok();
    stop_http.send(()).ok();
    match http_task.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server exited with error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    node.shutdown().context("flushing block cache")?;
    info!("Lumen node shutdown complete");
    Ok(())
}

/// Initialize tracing with the given filter and output format.
///
/// `format = "json"` emits one JSON object per line; anything else is text.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
