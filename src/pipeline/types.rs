//! Core data types: relay bid traces, stored payloads, running statistics

use super::error::RecordError;
use super::units::wei_to_eth;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Newest statistics layout this binary reads and writes
pub const STATS_SCHEMA_VERSION: u32 = 1;

/// Largest integer a SQLite INTEGER column holds
pub const MAX_STORED_INTEGER: u64 = i64::MAX as u64;

/// Delivered-payload bid trace as served by a relay data API
///
/// Relays encode the numeric fields as decimal strings; plain JSON
/// numbers are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRecord {
    #[serde(deserialize_with = "u64_from_str_or_number")]
    pub slot: u64,
    pub parent_hash: String,
    pub block_hash: String,
    pub builder_pubkey: String,
    pub proposer_pubkey: String,
    pub proposer_fee_recipient: String,
    #[serde(deserialize_with = "u64_from_str_or_number")]
    pub gas_limit: u64,
    #[serde(deserialize_with = "u64_from_str_or_number")]
    pub gas_used: u64,
    /// Bid value in wei, kept as the relay's decimal string
    pub value: String,
}

impl BidRecord {
    pub fn position(&self) -> u64 {
        self.slot
    }

    /// Check that the record fits the store and has a foldable wei value
    pub fn validate(&self) -> Result<(), RecordError> {
        let integers = [
            ("slot", self.slot),
            ("gas_limit", self.gas_limit),
            ("gas_used", self.gas_used),
        ];
        for (field, value) in integers {
            if value > MAX_STORED_INTEGER {
                return Err(RecordError::OutOfRange { field, value });
            }
        }
        wei_to_eth(&self.value)?;
        Ok(())
    }
}

/// Bid trace as persisted in the record store, tagged with its relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub source_name: String,
    pub position: u64,
    pub parent_hash: String,
    pub block_hash: String,
    pub builder_pubkey: String,
    pub proposer_pubkey: String,
    pub proposer_fee_recipient: String,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub value: String,
}

impl PersistedRecord {
    pub fn from_bid(source_name: &str, bid: BidRecord) -> Self {
        Self {
            source_name: source_name.to_string(),
            position: bid.position(),
            parent_hash: bid.parent_hash,
            block_hash: bid.block_hash,
            builder_pubkey: bid.builder_pubkey,
            proposer_pubkey: bid.proposer_pubkey,
            proposer_fee_recipient: bid.proposer_fee_recipient,
            gas_limit: bid.gas_limit,
            gas_used: bid.gas_used,
            value: bid.value,
        }
    }
}

/// Running totals since the merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalCounts {
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub payloads: u64,
}

/// Rolling 24h window, recomputed every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyCounts {
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub payloads: u64,
    #[serde(default, rename = "topRelayPayloads")]
    pub top_relay_payloads: u64,
}

/// Per-relay leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAggregate {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    /// Cumulative delivered value in ETH
    #[serde(default)]
    pub value: Decimal,
    #[serde(default)]
    pub avg_value: Decimal,
}

/// Per-builder leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderAggregate {
    pub pubkey: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub value: Decimal,
    #[serde(default)]
    pub avg_value: Decimal,
    /// Relay that delivered this builder's most recent payload
    #[serde(default)]
    pub last_relay: String,
}

/// Cached statistics summary, stored as one JSON value under `stats`
///
/// Field names match what the dashboard reads. Blobs written before the
/// version tag existed deserialize as version 0 with defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningStatistics {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, rename = "last_slot")]
    pub last_processed_position: u64,
    #[serde(default, rename = "total")]
    pub total_counts: TotalCounts,
    #[serde(default, rename = "daily")]
    pub daily_window_counts: DailyCounts,
    /// Sorted by count, descending
    #[serde(default, rename = "relays")]
    pub per_source_aggregates: Vec<SourceAggregate>,
    /// Sorted by count, descending
    #[serde(default, rename = "builders")]
    pub per_builder_aggregates: Vec<BuilderAggregate>,
}

impl Default for RunningStatistics {
    fn default() -> Self {
        Self {
            schema_version: STATS_SCHEMA_VERSION,
            last_processed_position: 0,
            total_counts: TotalCounts::default(),
            daily_window_counts: DailyCounts::default(),
            per_source_aggregates: Vec::new(),
            per_builder_aggregates: Vec::new(),
        }
    }
}

fn u64_from_str_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNumber {
        Str(String),
        Number(u64),
    }

    match StrOrNumber::deserialize(deserializer)? {
        StrOrNumber::Number(n) => Ok(n),
        StrOrNumber::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
