//! Guard & audit service.
//!
//! # Architecture Overview
//!
//! ```text
//!   request ──▶ request id / trace / timeout / body limit
//!                   │
//!                   ▼
//!            ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!            │  rate limit  │──▶│ session/role │──▶│     CSRF     │──▶ read-only
//!            └──────┬───────┘   └──────┬───────┘   └──────────────┘       │
//!                   │                  │                                   ▼
//!                   ▼                  ▼                         handler + cooldown
//!            ┌─────────────────────────────────┐                          │
//!            │   KvStore (memory | redis)      │◀─────────────────────────┤
//!            └─────────────────────────────────┘                          ▼
//!                                                              audit chain (admin)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use intel_guard::audit::{AuditStore, FileAuditStore, MemoryAuditStore};
use intel_guard::config::{
    loader::{config_from_env, load_config},
    watcher::ConfigWatcher,
    GuardConfig, StoreBackend,
};
use intel_guard::directory::MemoryDirectory;
use intel_guard::lifecycle::{wait_for_shutdown_signal, Shutdown};
use intel_guard::observability::{logging, metrics};
use intel_guard::store::{Clock, KvStore, MemoryStore, SystemClock};
use intel_guard::{AppState, GuardServer};

#[derive(Parser)]
#[command(name = "intel-guard", version, about = "Request guard and audit service")]
struct Args {
    /// TOML configuration file. Without it, defaults plus environment are used.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => config_from_env()?,
    };

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "intel-guard starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = ?config.security.environment,
        store = ?config.store.backend,
        read_only = config.security.read_only,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&config, clock.clone()).await?;
    let audit_store: Arc<dyn AuditStore> = match &config.audit.path {
        Some(path) => Arc::new(FileAuditStore::open(path, clock.clone()).await?),
        None => {
            tracing::warn!("No audit path configured, audit log is kept in memory only");
            Arc::new(MemoryAuditStore::new(clock.clone()))
        }
    };

    // Hot reload only applies when started from a file.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (rx, Some(watcher.run()?))
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let state = AppState::new(
        config,
        store,
        audit_store,
        Arc::new(MemoryDirectory::new()),
        clock,
    );

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.trigger();
    });

    GuardServer::new(state)
        .run(listener, config_updates, server_shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn build_store(
    config: &GuardConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn KvStore>, Box<dyn std::error::Error>> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::new(clock);
            store.start_sweeper(Duration::from_secs(config.store.sweep_interval_secs.max(1)));
            Ok(Arc::new(store))
        }
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => {
            let url = config.store.url.as_deref().ok_or("store.url is required for redis")?;
            Ok(Arc::new(intel_guard::store::redis::RedisStore::connect(url).await?))
        }
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => {
            Err("redis store requested but this build lacks the `redis-store` feature".into())
        }
    }
}
