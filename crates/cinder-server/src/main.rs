mod config;
mod connection;
mod fanout;
mod metrics;
mod server;
mod shutdown;
#[cfg(test)]
mod testing;
mod transcode;
mod write;

use std::path::PathBuf;

use cinder_core::ShardManager;
use clap::Parser;
use tracing::{info, warn};

use crate::config::CinderConfig;
use crate::server::{ServerError, WebsocketServer};

#[derive(Parser)]
#[command(name = "cinder-server", about = "websocket command bridge for the cinder store")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "CINDER_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// address to bind to
    #[arg(long, env = "CINDER_HOST")]
    host: Option<String>,

    /// port to listen on
    #[arg(short, long, env = "CINDER_PORT")]
    port: Option<u16>,

    /// number of store shards
    #[arg(long, env = "CINDER_SHARDS")]
    shards: Option<usize>,

    /// serve prometheus metrics at /metrics
    #[arg(long, env = "CINDER_METRICS")]
    metrics: bool,

    /// attempts per websocket write before the connection is dropped
    #[arg(long, env = "CINDER_MAX_WRITE_RETRIES")]
    max_write_retries: Option<u32>,

    /// deadline for a single websocket write attempt, in milliseconds
    #[arg(long, env = "CINDER_WRITE_TIMEOUT_MS")]
    write_timeout_ms: Option<u64>,
}

fn apply_args(cfg: &mut CinderConfig, args: &Args) {
    if let Some(ref host) = args.host {
        cfg.bind = host.clone();
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(shards) = args.shards {
        cfg.shards = shards;
    }
    if args.metrics {
        cfg.metrics = true;
    }
    if let Some(retries) = args.max_write_retries {
        cfg.websocket.max_write_response_retries = retries;
    }
    if let Some(ms) = args.write_timeout_ms {
        cfg.websocket.write_response_timeout_ms = ms;
    }
}

fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder=info".into()),
        )
        .init();

    let args = Args::parse();

    // --config-template: dump defaults and exit
    if args.config_template {
        match CinderConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    // defaults → TOML file → CLI/env overrides
    let mut cfg = match &args.config {
        Some(path) => CinderConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => CinderConfig::default(),
    };
    apply_args(&mut cfg, &args);
    if let Err(e) = cfg.validate() {
        exit_err(e);
    }

    let prometheus = if cfg.metrics {
        Some(metrics::install_recorder().unwrap_or_else(|e| exit_err(e)))
    } else {
        None
    };

    let manager = ShardManager::new(cfg.engine_config());
    info!(
        shards = manager.shard_count(),
        migrated = manager.migrated().len(),
        "store engine started"
    );

    let server =
        WebsocketServer::new(&cfg, manager, prometheus).unwrap_or_else(|e| exit_err(e));

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    match server.run(ctrl_c).await {
        Ok(()) => info!("server stopped"),
        Err(ServerError::Aborted) => info!("server stopped by ABORT"),
        Err(e) => exit_err(e),
    }
}
