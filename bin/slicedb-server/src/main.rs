//! SliceDB daemon
//!
//! Runs one storage node plus the co-hosted broker on a single HTTP
//! listener: the signed control plane and peer data plane under
//! `/node/`, the client surface at the root.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use slicedb_broker::Broker;
use slicedb_node::Node;
use slicedb_spec::SpecManager;
use slicedb_storage::{MemStore, RedbStore, Store};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default port of the HTTP service
const DEFAULT_HTTP_PORT: u16 = 5670;

#[derive(Parser, Debug)]
#[command(name = "slicedb-server")]
#[command(about = "SliceDB storage node daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/slicedb/server.toml")]
    config: String,

    /// IP:port binding of the HTTP service
    #[arg(short, long)]
    bind: Option<String>,

    /// Data directory for the store
    #[arg(long)]
    dir: Option<String>,

    /// Run on an in-memory store (all data lost on exit)
    #[arg(long)]
    dev: bool,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default)]
    data_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    format!("0.0.0.0:{DEFAULT_HTTP_PORT}")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn data_dir(arg: Option<String>, config: Option<String>) -> PathBuf {
    if let Some(dir) = arg.or(config) {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slicedb-node")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config: Config = if std::path::Path::new(&args.config).exists() {
        let text = std::fs::read_to_string(&args.config)
            .with_context(|| format!("read config {}", args.config))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", args.config))?
    } else {
        Config::default()
    };

    let bind = args.bind.unwrap_or(config.server.bind);
    let log_level = args.log_level.unwrap_or(config.logging.level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting slicedb-server");

    let store: Arc<dyn Store> = if args.dev {
        warn!("running in dev mode, data is not persisted");
        Arc::new(MemStore::new())
    } else {
        let dir = data_dir(args.dir, config.server.data_dir);
        std::fs::create_dir_all(&dir).with_context(|| format!("create data dir {dir:?}"))?;
        info!(dir = %dir.display(), "data directory");
        Arc::new(RedbStore::open(dir.join("store.redb"))?)
    };

    let spec_mgr = Arc::new(SpecManager::new(store.clone()));
    let node = Node::new(store.clone(), spec_mgr.clone())?;
    info!(node_id = node.id(), "node identity");
    if node.cluster_id().is_empty() {
        info!("not yet in a cluster, waiting for invitation");
    } else {
        info!(cluster_id = node.cluster_id(), "cluster membership");
    }
    node.start();

    let broker = Arc::new(Broker::new(store, spec_mgr));

    let app = slicedb_node::router(node.clone()).merge(slicedb_broker::router(broker.clone()));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down...");
        })
        .await?;

    broker.shutdown().await;
    node.shutdown().await;
    info!("exited");
    Ok(())
}
