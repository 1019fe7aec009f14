//! Error taxonomy for the sync pipeline
//!
//! Feed errors are transient: the extractor logs them and treats the page
//! as empty. Everything that reaches [`SyncError`] is fatal for the task
//! that raised it and, through the supervisor, for the process.

use thiserror::Error;

/// Remote relay feed failure (non-fatal)
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay responded with status {status}")]
    Status { status: u16 },
}

/// Chain RPC failure
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("rpc response carried no result")]
    MissingResult,

    #[error("invalid block number: {0}")]
    InvalidBlockNumber(String),
}

/// Record store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    LockPoisoned,
}

/// Key-value cache failure
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache connection lock poisoned")]
    LockPoisoned,

    #[error("invalid watermark for {key}: {value:?}")]
    InvalidWatermark { key: String, value: String },
}

/// Wei amount conversion failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitsError {
    #[error("not an unsigned integer wei amount: {0:?}")]
    NotAnInteger(String),

    #[error("wei amount too large: {0}")]
    Overflow(String),
}

/// Relay record that cannot be stored or folded into statistics
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("{field} {value} exceeds the storable integer range")]
    OutOfRange { field: &'static str, value: u64 },

    #[error("invalid value: {0}")]
    Value(#[from] UnitsError),
}

/// Configuration failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Fatal error for an extractor or aggregator cycle
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("chain rpc error: {0}")]
    Chain(#[from] ChainError),

    #[error("units error: {0}")]
    Units(#[from] UnitsError),

    #[error("statistics encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("{source_name}: expected to insert {expected} payloads, store inserted {inserted}")]
    InsertCountMismatch {
        source_name: String,
        expected: usize,
        inserted: usize,
    },

    #[error("cached statistics have schema version {found}, newest supported is {supported}")]
    UnsupportedStatsVersion { found: u32, supported: u32 },

    #[error("task {0} panicked or was aborted")]
    TaskFailed(String),
}
