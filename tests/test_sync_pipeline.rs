//! End-to-end sync: relay extractors feeding the statistics aggregator
//!
//! Two scripted relays share one SQLite store and one SQLite cache. The
//! tests drive whole cycles the way the runtime does and check that every
//! payload is stored and counted exactly once, across cycles and restarts.

#[cfg(test)]
mod sync_pipeline_tests {
    use async_trait::async_trait;
    use relaystats::pipeline::{
        aggregator::{AggregateOutcome, Aggregator},
        cache::{read_watermark, KeyValueCache, SqliteCache, STATS_KEY},
        chain::ChainRpc,
        db::{RecordQuery, RecordStore, SqliteRecordStore},
        error::{ChainError, FeedError},
        extractor::{Extractor, ExtractorOptions},
        relay::{PayloadFeed, PAGE_SIZE},
        slot_clock::SlotClock,
        types::{BidRecord, RunningStatistics},
    };
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    const GENESIS_BLOCK: u64 = 15_537_393;

    fn make_bid(slot: u64) -> BidRecord {
        BidRecord {
            slot,
            parent_hash: format!("0xparent{}", slot),
            block_hash: format!("0xblock{}", slot),
            builder_pubkey: "0xbuilder".to_string(),
            proposer_pubkey: "0xproposer".to_string(),
            proposer_fee_recipient: "0xfee".to_string(),
            gas_limit: 30_000_000,
            gas_used: 12_000_000,
            value: "1000000000000000000".to_string(),
        }
    }

    /// Relay whose history can grow between cycles
    struct GrowingFeed {
        name: String,
        slots: Mutex<Vec<u64>>,
        /// Slots served with a hex value instead of a wei integer
        hex_values: Mutex<Vec<u64>>,
    }

    impl GrowingFeed {
        fn new(name: &str, newest: u64, oldest: u64) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                slots: Mutex::new((oldest..=newest).rev().collect()),
                hex_values: Mutex::new(Vec::new()),
            })
        }

        fn serve_hex_value(&self, slot: u64) {
            self.hex_values.lock().unwrap().push(slot);
        }

        fn deliver(&self, newest: u64, oldest: u64) {
            let mut slots = self.slots.lock().unwrap();
            let mut fresh: Vec<u64> = (oldest..=newest).rev().collect();
            fresh.extend(slots.iter().copied());
            *slots = fresh;
        }
    }

    #[async_trait]
    impl PayloadFeed for GrowingFeed {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_page(&self, cursor: Option<u64>) -> Result<Vec<BidRecord>, FeedError> {
            let slots = self.slots.lock().unwrap();
            let hex_values = self.hex_values.lock().unwrap();
            Ok(slots
                .iter()
                .filter(|s| cursor.map_or(true, |c| **s <= c))
                .take(PAGE_SIZE)
                .map(|s| {
                    let mut bid = make_bid(*s);
                    if hex_values.contains(s) {
                        bid.value = "0x10".to_string();
                    }
                    bid
                })
                .collect())
        }
    }

    struct FixedChain(u64);

    #[async_trait]
    impl ChainRpc for FixedChain {
        async fn latest_block_number(&self) -> Result<u64, ChainError> {
            Ok(self.0)
        }
    }

    struct Runtime {
        store: Arc<SqliteRecordStore>,
        cache: Arc<SqliteCache>,
        extractors: Vec<Extractor>,
        aggregator: Aggregator,
    }

    /// Open store and cache under `dir` and wire up every task, like the binary
    fn start(dir: &Path, feeds: &[Arc<GrowingFeed>], head_slot: u64) -> Runtime {
        let store = Arc::new(SqliteRecordStore::open(dir.join("relaystats.db")).unwrap());
        let cache = Arc::new(SqliteCache::open(dir.join("cache.db")).unwrap());

        let extractors = feeds
            .iter()
            .map(|feed| {
                Extractor::new(
                    feed.clone(),
                    store.clone(),
                    cache.clone(),
                    ExtractorOptions::default(),
                )
            })
            .collect();

        let clock = SlotClock {
            genesis_timestamp: 0,
            genesis_slot: 0,
            seconds_per_slot: 12,
        };
        let now = (head_slot * 12) as i64;
        let aggregator = Aggregator::new(
            store.clone(),
            cache.clone(),
            Arc::new(FixedChain(GENESIS_BLOCK + 1_000)),
            clock,
            GENESIS_BLOCK,
        )
        .with_now_fn(Box::new(move || now));

        Runtime {
            store,
            cache,
            extractors,
            aggregator,
        }
    }

    async fn sync_all(runtime: &Runtime) -> usize {
        let mut persisted = 0;
        for extractor in &runtime.extractors {
            persisted += extractor.run_cycle().await.unwrap().persisted;
        }
        persisted
    }

    async fn cached_stats(cache: &SqliteCache) -> (String, RunningStatistics) {
        let raw = cache.get(STATS_KEY).await.unwrap().expect("stats written");
        let stats = serde_json::from_str(&raw).unwrap();
        (raw, stats)
    }

    fn relay_count(stats: &RunningStatistics, name: &str) -> u64 {
        stats
            .per_source_aggregates
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_two_relays_sync_and_aggregate() {
        let dir = tempdir().unwrap();
        let flashbots = GrowingFeed::new("flashbots", 1000, 851);
        let ultrasound = GrowingFeed::new("ultrasound", 960, 911);
        let runtime = start(dir.path(), &[flashbots, ultrasound], 1000);

        assert_eq!(sync_all(&runtime).await, 200);

        let outcome = runtime.aggregator.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            AggregateOutcome::Updated {
                folded: 200,
                last_processed_position: 1000,
            }
        );

        let (_, stats) = cached_stats(&runtime.cache).await;
        assert_eq!(stats.last_processed_position, 1000);
        assert_eq!(stats.total_counts.blocks, 1_000);
        assert_eq!(stats.total_counts.payloads, 200);
        assert_eq!(relay_count(&stats, "flashbots"), 150);
        assert_eq!(relay_count(&stats, "ultrasound"), 50);
        assert_eq!(stats.per_source_aggregates[0].name, "flashbots");

        // Both relays reported slots 911..=960; the daily window counts each slot once
        assert_eq!(stats.daily_window_counts.payloads, 150);
        assert_eq!(stats.daily_window_counts.top_relay_payloads, 150);

        let builder = &stats.per_builder_aggregates[0];
        assert_eq!(builder.count, 200);
        assert_eq!(builder.value, dec!(200));
        assert_eq!(builder.avg_value, dec!(1));
    }

    #[tokio::test]
    async fn test_repeated_cycles_store_each_payload_once() {
        let dir = tempdir().unwrap();
        let flashbots = GrowingFeed::new("flashbots", 1000, 851);
        let ultrasound = GrowingFeed::new("ultrasound", 960, 911);
        let runtime = start(dir.path(), &[flashbots.clone(), ultrasound.clone()], 1010);

        sync_all(&runtime).await;
        runtime.aggregator.run_cycle().await.unwrap();
        let (first_blob, _) = cached_stats(&runtime.cache).await;

        // Nothing new: extractors and aggregator are no-ops
        assert_eq!(sync_all(&runtime).await, 0);
        assert_eq!(
            runtime.aggregator.run_cycle().await.unwrap(),
            AggregateOutcome::Unchanged
        );
        let (second_blob, _) = cached_stats(&runtime.cache).await;
        assert_eq!(first_blob, second_blob);

        // Flashbots delivers ten more blocks
        flashbots.deliver(1010, 1001);
        assert_eq!(sync_all(&runtime).await, 10);
        assert_eq!(
            read_watermark(runtime.cache.as_ref(), "flashbots").await.unwrap(),
            Some(1010)
        );
        assert_eq!(
            read_watermark(runtime.cache.as_ref(), "ultrasound").await.unwrap(),
            Some(960)
        );

        runtime.aggregator.run_cycle().await.unwrap();
        let (_, stats) = cached_stats(&runtime.cache).await;
        assert_eq!(stats.last_processed_position, 1010);
        assert_eq!(stats.total_counts.payloads, 210);
        assert_eq!(relay_count(&stats, "flashbots"), 160);
        assert_eq!(relay_count(&stats, "ultrasound"), 50);

        let stored = runtime.store.find_many(&RecordQuery::after(0)).await.unwrap();
        assert_eq!(stored.len(), 210);
        let unique: HashSet<(String, u64)> = stored
            .iter()
            .map(|r| (r.source_name.clone(), r.position))
            .collect();
        assert_eq!(unique.len(), 210);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_cached_watermarks() {
        let dir = tempdir().unwrap();
        let flashbots = GrowingFeed::new("flashbots", 1000, 851);

        {
            let runtime = start(dir.path(), &[flashbots.clone()], 1000);
            assert_eq!(sync_all(&runtime).await, 150);
            runtime.aggregator.run_cycle().await.unwrap();
        }

        flashbots.deliver(1005, 1001);

        let runtime = start(dir.path(), &[flashbots.clone()], 1005);
        assert_eq!(sync_all(&runtime).await, 5);
        assert_eq!(
            runtime.aggregator.run_cycle().await.unwrap(),
            AggregateOutcome::Updated {
                folded: 5,
                last_processed_position: 1005,
            }
        );

        let (_, stats) = cached_stats(&runtime.cache).await;
        assert_eq!(stats.total_counts.payloads, 155);
        assert_eq!(relay_count(&stats, "flashbots"), 155);
        assert_eq!(
            runtime.store.find_many(&RecordQuery::after(0)).await.unwrap().len(),
            155
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_stall_statistics() {
        let dir = tempdir().unwrap();
        let flashbots = GrowingFeed::new("flashbots", 11, 10);
        flashbots.serve_hex_value(10);
        let runtime = start(dir.path(), &[flashbots.clone()], 20);

        assert_eq!(sync_all(&runtime).await, 1);

        for _ in 0..3 {
            runtime.aggregator.run_cycle().await.unwrap();
        }

        let (_, stats) = cached_stats(&runtime.cache).await;
        assert_eq!(stats.last_processed_position, 11);
        assert_eq!(relay_count(&stats, "flashbots"), 1);
        assert_eq!(
            runtime.store.find_many(&RecordQuery::after(0)).await.unwrap().len(),
            1
        );
    }
}
