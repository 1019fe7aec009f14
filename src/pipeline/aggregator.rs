//! Statistics aggregator
//!
//! Folds payloads stored since the last processed slot into the cached
//! [`RunningStatistics`] and writes the whole summary back in one `set`.
//!
//! ## Cycle
//!
//! 1. Read `stats` from the cache (zero value if absent)
//! 2. Query payloads with slot > `last_slot`, newest first; none → no-op
//! 3. Totals: running payload count, post-merge block count from the chain
//! 4. Daily window: recomputed from the store over the last ~7200 slots
//! 5. Leaderboards: fold each payload into relay and builder entries
//! 6. Overwrite `stats`
//!
//! Folding is additive, so the same payload folded twice is counted
//! twice. The `last_slot` cursor is what keeps each payload folded once.

use super::cache::{KeyValueCache, STATS_KEY};
use super::chain::ChainRpc;
use super::db::{RecordQuery, RecordStore};
use super::error::SyncError;
use super::scheduler::SyncTask;
use super::slot_clock::SlotClock;
use super::types::{
    BuilderAggregate, DailyCounts, PersistedRecord, RunningStatistics, SourceAggregate,
    TotalCounts, STATS_SCHEMA_VERSION,
};
use super::units::wei_to_eth;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one aggregator cycle
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    /// No payloads newer than the cached cursor
    Unchanged,
    Updated {
        folded: usize,
        last_processed_position: u64,
    },
}

pub struct Aggregator {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn KeyValueCache>,
    chain: Arc<dyn ChainRpc>,
    clock: SlotClock,
    genesis_block: u64,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl Aggregator {
    /// Create an aggregator using wall-clock time for the daily window
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn KeyValueCache>,
        chain: Arc<dyn ChainRpc>,
        clock: SlotClock,
        genesis_block: u64,
    ) -> Self {
        Self {
            store,
            cache,
            chain,
            clock,
            genesis_block,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Replace the clock used for the daily window (tests)
    pub fn with_now_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Load cached statistics, or the zero value when nothing is cached
    pub async fn load_statistics(&self) -> Result<RunningStatistics, SyncError> {
        let Some(raw) = self.cache.get(STATS_KEY).await? else {
            log::info!("Stats: no cached stats");
            return Ok(RunningStatistics::default());
        };

        let stats: RunningStatistics = serde_json::from_str(&raw).map_err(|e| {
            log::error!("❌ Stats: cached summary is not valid JSON: {}", e);
            e
        })?;

        if stats.schema_version > STATS_SCHEMA_VERSION {
            return Err(SyncError::UnsupportedStatsVersion {
                found: stats.schema_version,
                supported: STATS_SCHEMA_VERSION,
            });
        }

        Ok(stats)
    }

    async fn collect_total_counts(
        &self,
        previous: &TotalCounts,
        new_payloads: usize,
    ) -> Result<TotalCounts, SyncError> {
        let latest_block = self.chain.latest_block_number().await.map_err(|e| {
            log::error!("❌ Stats: error collecting block number: {}", e);
            e
        })?;

        Ok(TotalCounts {
            blocks: latest_block.saturating_sub(self.genesis_block),
            payloads: previous.payloads + new_payloads as u64,
        })
    }

    /// Count relay-delivered blocks over the trailing ~24h of slots
    async fn collect_daily_counts(&self) -> Result<DailyCounts, SyncError> {
        let since = self.clock.slot_day_ago_at((self.now_fn)());

        // Some relays double-report a shared block; count each slot once
        let payloads = self
            .store
            .find_many(&RecordQuery::at_or_after(since).distinct())
            .await?;

        let mut per_relay: HashMap<&str, u64> = HashMap::new();
        for payload in &payloads {
            *per_relay.entry(payload.source_name.as_str()).or_insert(0) += 1;
        }

        Ok(DailyCounts {
            blocks: self.clock.slots_per_day(),
            payloads: payloads.len() as u64,
            top_relay_payloads: per_relay.values().copied().max().unwrap_or(0),
        })
    }

    /// Run one aggregation pass
    pub async fn run_cycle(&self) -> Result<AggregateOutcome, SyncError> {
        let mut stats = self.load_statistics().await?;

        let payloads = self
            .store
            .find_many(&RecordQuery::after(stats.last_processed_position))
            .await?;
        if payloads.is_empty() {
            log::info!("Stats: No payloads retrieved");
            return Ok(AggregateOutcome::Unchanged);
        }

        stats.total_counts = self
            .collect_total_counts(&stats.total_counts, payloads.len())
            .await?;
        stats.daily_window_counts = self.collect_daily_counts().await?;
        fold_records(&mut stats, &payloads)?;
        stats.schema_version = STATS_SCHEMA_VERSION;

        let encoded = serde_json::to_string(&stats)?;
        self.cache.set(STATS_KEY, &encoded).await.map_err(|e| {
            log::error!("❌ Stats: Could not update in cache: {}", e);
            e
        })?;

        log::info!(
            "Stats: Updated in cache ({} payloads folded, last slot {})",
            payloads.len(),
            stats.last_processed_position
        );

        Ok(AggregateOutcome::Updated {
            folded: payloads.len(),
            last_processed_position: stats.last_processed_position,
        })
    }
}

/// Fold payloads into the relay and builder leaderboards
///
/// Payloads are applied in ascending slot order, whatever order `records`
/// arrives in, so `last_relay` names the relay of each builder's newest
/// payload. Both leaderboards are then re-sorted by count, descending.
/// The sort is stable: tied entries that already existed keep their
/// previous order, and entries new in this batch follow them in the order
/// of their oldest payload (lowest slot first). Nothing is modified on
/// error.
pub fn fold_records(
    stats: &mut RunningStatistics,
    records: &[PersistedRecord],
) -> Result<(), SyncError> {
    let mut ordered: Vec<(&PersistedRecord, Decimal)> = records
        .iter()
        .map(|r| wei_to_eth(&r.value).map(|eth| (r, eth)))
        .collect::<Result<_, _>>()?;
    ordered.sort_by_key(|(r, _)| r.position);

    let mut relays = stats.per_source_aggregates.clone();
    let mut builders = stats.per_builder_aggregates.clone();
    let mut relay_index: HashMap<String, usize> = relays
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.clone(), i))
        .collect();
    let mut builder_index: HashMap<String, usize> = builders
        .iter()
        .enumerate()
        .map(|(i, b)| (b.pubkey.clone(), i))
        .collect();

    for (record, eth) in ordered {
        let i = *relay_index
            .entry(record.source_name.clone())
            .or_insert_with(|| {
                relays.push(SourceAggregate {
                    name: record.source_name.clone(),
                    count: 0,
                    value: Decimal::ZERO,
                    avg_value: Decimal::ZERO,
                });
                relays.len() - 1
            });
        let relay = &mut relays[i];
        relay.count += 1;
        relay.value += eth;
        relay.avg_value = relay.value / Decimal::from(relay.count);

        let i = *builder_index
            .entry(record.builder_pubkey.clone())
            .or_insert_with(|| {
                builders.push(BuilderAggregate {
                    pubkey: record.builder_pubkey.clone(),
                    count: 0,
                    value: Decimal::ZERO,
                    avg_value: Decimal::ZERO,
                    last_relay: String::new(),
                });
                builders.len() - 1
            });
        let builder = &mut builders[i];
        builder.count += 1;
        builder.value += eth;
        builder.avg_value = builder.value / Decimal::from(builder.count);
        builder.last_relay = record.source_name.clone();

        stats.last_processed_position = stats.last_processed_position.max(record.position);
    }

    // Stable sorts: ties keep insertion order
    relays.sort_by(|a, b| b.count.cmp(&a.count));
    builders.sort_by(|a, b| b.count.cmp(&a.count));

    stats.per_source_aggregates = relays;
    stats.per_builder_aggregates = builders;
    Ok(())
}

#[async_trait]
impl SyncTask for Aggregator {
    fn name(&self) -> &str {
        "Stats"
    }

    async fn run_cycle(&self) -> Result<(), SyncError> {
        Aggregator::run_cycle(self).await.map(|_| ())
    }
}
