//! Relay Stats Runtime
//!
//! Runs one extractor per configured relay plus the statistics aggregator:
//! - Opens the payload store and the watermark/statistics cache
//! - Spawns every sync task on the configured interval
//! - Stops on CTRL+C, or exits non-zero on the first fatal task error
//!
//! Usage:
//!   cargo run --release --bin relaystats
//!
//! Environment variables:
//!   RPC_URL - Execution-layer JSON-RPC endpoint (required)
//!   RELAYS - name=url list (default: Flashbots)
//!   RELAYSTATS_DB_PATH - Payload database (default: data/relaystats.db)
//!   CACHE_BACKEND - sqlite | memory (default: sqlite)
//!   SYNC_INTERVAL_SECS - Sleep between cycles (default: 30)
//!   ENABLE_AGGREGATOR - Run the statistics task (default: true)

use dotenv::dotenv;
use log::{error, info};
use relaystats::pipeline::{
    aggregator::Aggregator,
    cache::{KeyValueCache, MemoryCache, SqliteCache},
    chain::{ChainRpc, JsonRpcClient},
    config::{CacheBackend, PipelineConfig},
    db::{RecordStore, SqliteRecordStore},
    extractor::{Extractor, ExtractorOptions},
    relay::{PayloadFeed, RelayClient},
    scheduler::Supervisor,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Relay Stats Runtime");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("✅ Configuration loaded");
    info!("   ├─ Relays: {}", config.relays.len());
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Cache: {:?}", config.cache_backend);
    info!("   ├─ Sync interval: {}s", config.sync_interval_secs);
    info!("   ├─ Page budget: {} pages/cycle", config.max_pages_per_cycle);
    info!("   └─ Aggregator: {}", if config.aggregator_enabled { "enabled" } else { "disabled" });

    info!("🔧 Initializing storage...");
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open(&config.db_path)?);
    let cache: Arc<dyn KeyValueCache> = match config.cache_backend {
        CacheBackend::Sqlite => Arc::new(SqliteCache::open(&config.cache_db_path)?),
        CacheBackend::Memory => {
            info!("⚠️  Memory cache: watermarks are lost on restart");
            Arc::new(MemoryCache::new())
        }
    };
    info!("✅ Storage initialized");

    let timeout = Duration::from_secs(config.http_timeout_secs);
    let interval = Duration::from_secs(config.sync_interval_secs);
    let options = ExtractorOptions {
        max_pages: config.max_pages_per_cycle,
    };

    let mut supervisor = Supervisor::new();
    info!("🚀 Spawning sync tasks...");

    for relay in &config.relays {
        let feed: Arc<dyn PayloadFeed> = Arc::new(RelayClient::new(
            relay.name.clone(),
            relay.url.clone(),
            config.relay_path.clone(),
            timeout,
        )?);
        let extractor = Extractor::new(feed, store.clone(), cache.clone(), options);
        supervisor.spawn(Arc::new(extractor), interval);
    }

    if config.aggregator_enabled {
        let chain: Arc<dyn ChainRpc> = Arc::new(JsonRpcClient::new(config.rpc_url.clone(), timeout)?);
        let aggregator = Aggregator::new(
            store.clone(),
            cache.clone(),
            chain,
            config.slot_clock,
            config.genesis_block,
        );
        supervisor.spawn(Arc::new(aggregator), interval);
    }

    info!("✅ All sync tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let shutdown = supervisor.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("");
                info!("⚠️  Received CTRL+C, shutting down...");
            }
            Err(err) => {
                error!("❌ Failed to listen for CTRL+C: {}", err);
            }
        }
        shutdown.cancel();
    });

    if let Err(e) = supervisor.wait().await {
        error!("❌ Relay stats runtime stopped on a fatal error: {}", e);
        return Err(e.into());
    }

    info!("✅ Relay stats runtime stopped");
    Ok(())
}
