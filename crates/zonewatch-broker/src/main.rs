//! zonewatch Broker
//!
//! Accepts, validates, deduplicates, queues, and reports on DNS zone
//! health test requests. External test agents claim queued tests through
//! the store and write results back; an external engine performs the
//! actual DNS work.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use zonewatch_broker::engine::SystemZoneSource;
use zonewatch_broker::server::RpcService;
use zonewatch_broker::{server, storage};
use zonewatch_core::i18n::FallbackCatalog;
use zonewatch_core::{tracing_init, Config};

#[derive(Parser, Debug)]
#[command(name = "zonewatch-broker")]
#[command(version, about = "zonewatch broker - DNS zone health test request broker")]
struct Args {
    /// TCP bind address
    #[arg(long, default_value = "127.0.0.1:8080", env = "ZONEWATCH_ADDR")]
    addr: SocketAddr,

    /// Path to the INI-style configuration file
    #[arg(long, env = "ZONEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "ZONEWATCH_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_init::init_tracing("zonewatch_broker=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting zonewatch-broker"
    );

    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Config::load(path)?
        }
        None => {
            info!("No configuration file given; using defaults");
            Config::default()
        }
    };
    let config = Arc::new(config);

    info!(engine = config.db.engine.as_str(), "Opening store");
    let store = storage::open(&config.db).await?;

    let service = Arc::new(RpcService::new(
        config,
        store,
        Arc::new(SystemZoneSource),
        Arc::new(FallbackCatalog),
    ));

    server::serve(args.addr, service).await
}
