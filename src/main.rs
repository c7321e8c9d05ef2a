//! chpool - connection pool probe
//!
//! Opens a pool against a server, optionally leases every idle connection,
//! reports pool statistics and shuts down.

use anyhow::{Context, Result};
use chpool::config::{load_config, parse_config};
use chpool::pool::Pool;
use chpool::transport::TcpConnector;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// chpool - open a connection pool and report its health
#[derive(Parser, Debug)]
#[command(name = "chpool")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["dsn", "config"])))]
struct Args {
    /// Connection string, e.g. clickhouse://localhost:9000/default?pool_max_conns=4
    #[arg(short, long)]
    dsn: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// Lease and release every idle connection before reporting
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = match (&args.dsn, &args.config) {
        (Some(dsn), _) => parse_config(dsn).context("Invalid connection string")?,
        (None, Some(path)) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        (None, None) => anyhow::bail!("Either --dsn or --config is required"),
    };

    info!("chpool v{}", chpool::VERSION);
    info!("Connecting to: {}", config.conn().addr());
    info!(
        "Pool limits: min={} max={}",
        config.pool.min_connections, config.pool.max_connections
    );

    // Give up on Ctrl+C while the first connection is being established
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            cancel_on_signal.cancel();
        }
    });

    let pool = Pool::builder(config, TcpConnector::with_defaults())
        .connect_with_cancel(&cancel)
        .await?;

    if args.probe {
        let leases = pool.acquire_all_idle().await;
        info!("Probed {} idle connections", leases.len());
        for lease in &leases {
            match (lease.id(), lease.age()) {
                (Ok(id), Ok(age)) => info!("Connection {}: age {:?}", id, age),
                _ => warn!("Lease released during probe"),
            }
        }
        drop(leases);
    }

    let stat = pool.stat();
    info!(
        "Pool stats: total={} idle={} acquired={} constructing={} max={} new={}",
        stat.total_conns,
        stat.idle_conns,
        stat.acquired_conns,
        stat.constructing_conns,
        stat.max_conns,
        stat.new_conns_count
    );

    pool.close().await;
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
