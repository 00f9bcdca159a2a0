//! Coordination store server.
//!
//! Serves an in-memory key-value store with per-key TTLs over the
//! length-prefixed JSON protocol, so that every API server process can share
//! rate limit counters, locks, breaker records and the revocation filter.
//!
//! # Usage
//!
//! ```bash
//! rampart-store --config /etc/rampart/rampart.toml
//! rampart-store --bind 0.0.0.0:7400 --log-format json
//! ```
//!
//! Configuration layers: defaults < TOML < `RAMPART_*` environment < CLI args.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use rampart::config::LogFormat;
use rampart::logging::init_tracing;
use rampart::AppConfig;
use rampart_core::DeterministicKeyValueStore;
use rampart_core::KeyValueStore;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rampart-store", version, about = "Rampart coordination store server")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "RAMPART_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `store.bind_addr`.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log output format: compact or json.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.store.bind_addr = bind;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let store = DeterministicKeyValueStore::new();
    let listener = TcpListener::bind(config.store.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.store.bind_addr))?;
    let cancel = CancellationToken::new();

    let purge = spawn_purge(store.clone(), Duration::from_millis(config.store.purge_interval_ms), cancel.clone());
    let shared: Arc<dyn KeyValueStore> = store;
    let server = tokio::spawn(rampart_rpc::serve(listener, shared, cancel.clone()));

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    cancel.cancel();

    server.await.context("server task panicked")?.context("server failed")?;
    purge.await.context("purge task panicked")?;
    info!("coordination store stopped");
    Ok(())
}

/// Sweep expired keys so idle identities do not accumulate.
fn spawn_purge(
    store: Arc<DeterministicKeyValueStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.purge_expired().await;
                    if purged > 0 {
                        debug!(purged, "purged expired keys");
                    }
                }
            }
        }
    })
}
