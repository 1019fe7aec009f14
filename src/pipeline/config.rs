//! Pipeline configuration from environment variables

use super::cache::STATS_KEY;
use super::chain::DEFAULT_GENESIS_BLOCK;
use super::error::ConfigError;
use super::extractor::DEFAULT_MAX_PAGES;
use super::relay::DEFAULT_RELAY_PATH;
use super::slot_clock::{
    SlotClock, DEFAULT_GENESIS_SLOT, DEFAULT_GENESIS_TIMESTAMP, DEFAULT_SECONDS_PER_SLOT,
};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

pub const DEFAULT_RELAYS: &str = "Flashbots=https://0xac6e77dfe25ecd6110b8e780608cce0dab71fdd5ebea22a16c0205200f2f8e2e3ad3b71d3499c54ad14d6c21b41a37ae@boost-relay.flashbots.net";
pub const DEFAULT_DB_PATH: &str = "data/relaystats.db";
pub const DEFAULT_CACHE_DB_PATH: &str = "data/cache.db";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// One relay feed to mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Source name; also the relay's watermark key in the cache
    pub name: String,
    pub url: String,
}

/// Where watermarks and the statistics blob are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Sqlite,
    /// Process-local; every restart is a full resync
    Memory,
}

impl FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(CacheBackend::Sqlite),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "CACHE_BACKEND must be sqlite or memory, got {:?}",
                other
            ))),
        }
    }
}

/// Configuration for the sync runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub relays: Vec<RelayConfig>,

    /// Feed path appended to every relay URL
    pub relay_path: String,

    /// Path to the payload SQLite database
    pub db_path: String,

    pub cache_backend: CacheBackend,
    pub cache_db_path: String,

    /// Execution-layer JSON-RPC endpoint
    pub rpc_url: String,

    /// Sleep between cycles of every task
    pub sync_interval_secs: u64,

    /// Page budget for one extractor cycle
    pub max_pages_per_cycle: usize,

    pub http_timeout_secs: u64,

    pub slot_clock: SlotClock,

    /// Block number whose successors count as post-merge blocks
    pub genesis_block: u64,

    /// Run the statistics aggregator alongside the extractors
    pub aggregator_enabled: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RELAYS` - comma separated `name=url` list (default: Flashbots)
    /// - `RELAY_PATH` (default: the relay data API path)
    /// - `RELAYSTATS_DB_PATH` (default: data/relaystats.db)
    /// - `CACHE_BACKEND` - sqlite | memory (default: sqlite)
    /// - `CACHE_DB_PATH` (default: data/cache.db)
    /// - `RPC_URL` - required
    /// - `SYNC_INTERVAL_SECS` (default: 30)
    /// - `MAX_PAGES_PER_CYCLE` (default: 1000)
    /// - `HTTP_TIMEOUT_SECS` (default: 10)
    /// - `GENESIS_TIMESTAMP`, `GENESIS_SLOT`, `SECONDS_PER_SLOT`, `GENESIS_BLOCK`
    /// - `ENABLE_AGGREGATOR` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relays = parse_relays(
            &lookup("RELAYS").unwrap_or_else(|| DEFAULT_RELAYS.to_string()),
        )?;

        let rpc_url = lookup("RPC_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("RPC_URL".to_string()))?;
        if !is_http_url(&rpc_url) {
            return Err(ConfigError::InvalidValue(format!(
                "RPC_URL must be an http(s) URL, got {:?}",
                rpc_url
            )));
        }

        let cache_backend = match lookup("CACHE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => CacheBackend::Sqlite,
        };

        let slot_clock = SlotClock {
            genesis_timestamp: parse_or(&lookup, "GENESIS_TIMESTAMP", DEFAULT_GENESIS_TIMESTAMP),
            genesis_slot: parse_or(&lookup, "GENESIS_SLOT", DEFAULT_GENESIS_SLOT),
            seconds_per_slot: positive_or(&lookup, "SECONDS_PER_SLOT", DEFAULT_SECONDS_PER_SLOT),
        };

        Ok(Self {
            relays,
            relay_path: lookup("RELAY_PATH").unwrap_or_else(|| DEFAULT_RELAY_PATH.to_string()),
            db_path: lookup("RELAYSTATS_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            cache_backend,
            cache_db_path: lookup("CACHE_DB_PATH")
                .unwrap_or_else(|| DEFAULT_CACHE_DB_PATH.to_string()),
            rpc_url,
            sync_interval_secs: positive_or(&lookup, "SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS),
            max_pages_per_cycle: positive_or(&lookup, "MAX_PAGES_PER_CYCLE", DEFAULT_MAX_PAGES),
            http_timeout_secs: positive_or(&lookup, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            slot_clock,
            genesis_block: parse_or(&lookup, "GENESIS_BLOCK", DEFAULT_GENESIS_BLOCK),
            aggregator_enabled: parse_or(&lookup, "ENABLE_AGGREGATOR", true),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn positive_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .filter(|v: &T| *v > T::default())
        .unwrap_or(default)
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

/// Parse `name=url[,name=url...]`
///
/// Names double as cache keys, so they must be unique and must not shadow
/// the statistics key.
pub fn parse_relays(raw: &str) -> Result<Vec<RelayConfig>, ConfigError> {
    let mut relays = Vec::new();
    let mut seen = HashSet::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue(format!("RELAYS entry {:?} is not name=url", entry))
        })?;
        let (name, url) = (name.trim(), url.trim());

        if name.is_empty() || name == STATS_KEY {
            return Err(ConfigError::InvalidValue(format!(
                "RELAYS entry {:?} has an unusable name",
                entry
            )));
        }
        if !is_http_url(url) {
            return Err(ConfigError::InvalidValue(format!(
                "RELAYS entry {:?} must use an http(s) URL",
                entry
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::InvalidValue(format!(
                "RELAYS lists {:?} more than once",
                name
            )));
        }

        relays.push(RelayConfig {
            name: name.to_string(),
            url: url.to_string(),
        });
    }

    if relays.is_empty() {
        return Err(ConfigError::InvalidValue("RELAYS is empty".to_string()));
    }

    Ok(relays)
}
