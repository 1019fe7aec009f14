//! # Relay Payload Sync Pipeline
//!
//! Mirrors MEV-Boost relay "payload delivered" feeds into a local store and
//! keeps a running statistics summary in a key-value cache.
//!
//! ## Architecture
//!
//! 1. One extractor per relay pages the feed newest-first back to its cached
//!    watermark and appends fresh payloads to the shared store
//! 2. The aggregator folds payloads newer than its last processed slot into
//!    per-relay and per-builder totals
//! 3. The summary blob (`stats`) and every relay watermark live in the cache,
//!    so a restart resumes exactly where the last successful cycle ended
//!
//! Every task runs on its own interval under a [`scheduler::Supervisor`];
//! the first fatal error stops the process.
//!
//! ## Module Organization
//!
//! - `types` - Feed records, stored records, statistics blob
//! - `units` - Wei to ETH conversion
//! - `slot_clock` - Beacon slot arithmetic
//! - `relay` - Relay feed client
//! - `chain` - Execution-layer JSON-RPC client
//! - `db` - Append-only payload store
//! - `cache` - Watermarks and statistics cache
//! - `extractor` - Per-relay incremental sync
//! - `aggregator` - Statistics folding
//! - `scheduler` - Repeating tasks and shutdown
//! - `config` - Environment configuration
//! - `error` - Error types

pub mod aggregator;
pub mod cache;
pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod relay;
pub mod scheduler;
pub mod slot_clock;
pub mod types;
pub mod units;

// Re-export commonly used types
pub use aggregator::{AggregateOutcome, Aggregator};
pub use cache::{KeyValueCache, MemoryCache, SqliteCache};
pub use chain::{ChainRpc, JsonRpcClient};
pub use config::PipelineConfig;
pub use db::{RecordQuery, RecordStore, SqliteRecordStore};
pub use error::SyncError;
pub use extractor::{ExtractOutcome, Extractor, ExtractorOptions};
pub use relay::{PayloadFeed, RelayClient};
pub use scheduler::{Supervisor, SyncTask};
pub use slot_clock::SlotClock;
pub use types::{BidRecord, PersistedRecord, RunningStatistics};
