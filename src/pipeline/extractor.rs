//! Per-relay incremental extractor
//!
//! One cycle:
//! 1. Read the relay's watermark (highest slot already persisted)
//! 2. Page backwards from the newest payload until the page reaches the
//!    watermark, comes back short, or the page budget runs out
//! 3. Keep only payloads strictly above the watermark
//! 4. Insert them, verify the inserted count, then advance the watermark
//!
//! Page fetch failures are logged and end pagination for the cycle.
//! Store and cache failures are fatal.

use super::cache::{read_watermark, write_watermark, KeyValueCache};
use super::db::RecordStore;
use super::error::SyncError;
use super::relay::{PayloadFeed, PAGE_SIZE};
use super::scheduler::SyncTask;
use super::types::{BidRecord, PersistedRecord};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorOptions {
    /// Upper bound on pages fetched per cycle
    pub max_pages: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Result of one extractor cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOutcome {
    /// Records returned by the relay this cycle, before filtering
    pub fetched: usize,
    pub persisted: usize,
    pub pages: usize,
    /// Watermark after the cycle
    pub watermark: Option<u64>,
}

/// Pages pulled from the relay in one cycle
struct Collection {
    records: Vec<BidRecord>,
    pages: usize,
}

pub struct Extractor {
    feed: Arc<dyn PayloadFeed>,
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn KeyValueCache>,
    options: ExtractorOptions,
}

impl Extractor {
    pub fn new(
        feed: Arc<dyn PayloadFeed>,
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn KeyValueCache>,
        options: ExtractorOptions,
    ) -> Self {
        log::info!("Extractor: initializing relay: {}", feed.name());
        Self {
            feed,
            store,
            cache,
            options,
        }
    }

    pub fn source_name(&self) -> &str {
        self.feed.name()
    }

    /// Walk the feed from newest to oldest until the watermark is reached
    async fn collect_pages(&self, watermark: Option<u64>) -> Collection {
        let name = self.source_name();
        let mut records = Vec::new();
        let mut cursor: Option<u64> = None;
        let mut pages = 0;

        loop {
            if pages >= self.options.max_pages {
                log::warn!(
                    "⚠️  {}: stopped after {} pages without reaching the watermark",
                    name,
                    pages
                );
                break;
            }

            let page = match self.feed.fetch_page(cursor).await {
                Ok(page) => page,
                Err(e) => {
                    log::error!("{}: Error collecting payload (cursor: {:?}): {}", name, cursor, e);
                    Vec::new()
                }
            };
            pages += 1;

            let (page_len, oldest) = match page.last() {
                Some(last) => (page.len(), last.position()),
                None => break,
            };
            let reached_watermark = watermark
                .map(|mark| page.iter().any(|r| r.position() == mark) || oldest < mark)
                .unwrap_or(false);

            records.extend(page);

            if reached_watermark {
                log::debug!("{}: reached watermark {:?}", name, watermark);
                break;
            }
            if page_len < PAGE_SIZE {
                break;
            }
            match oldest.checked_sub(1) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Collection { records, pages }
    }

    /// Run one incremental pull for this relay
    pub async fn run_cycle(&self) -> Result<ExtractOutcome, SyncError> {
        let name = self.source_name().to_string();

        let watermark = read_watermark(self.cache.as_ref(), &name).await?;
        let collection = self.collect_pages(watermark).await;
        let fetched = collection.records.len();

        let fresh = fresh_records(&name, collection.records, watermark);
        if fresh.is_empty() {
            log::info!("{}: No fresh payloads", name);
            return Ok(ExtractOutcome {
                fetched,
                persisted: 0,
                pages: collection.pages,
                watermark,
            });
        }

        let records: Vec<PersistedRecord> = fresh
            .into_iter()
            .map(|bid| PersistedRecord::from_bid(&name, bid))
            .collect();
        let latest = records
            .iter()
            .map(|r| r.position)
            .fold(watermark.unwrap_or(0), u64::max);

        let inserted = self.store.insert_many(&records).await.map_err(|e| {
            log::error!("❌ {}: payload insertion to database failed: {}", name, e);
            e
        })?;
        if inserted != records.len() {
            log::error!(
                "❌ {}: {} payloads do not match inserted count: {}",
                name,
                records.len(),
                inserted
            );
            return Err(SyncError::InsertCountMismatch {
                source_name: name,
                expected: records.len(),
                inserted,
            });
        }
        log::info!("{}: Inserted {} payloads to database", name, inserted);

        write_watermark(self.cache.as_ref(), &name, latest)
            .await
            .map_err(|e| {
                log::error!("❌ {}: Could not update latest slot in cache: {}", name, e);
                e
            })?;
        log::info!("{}: Updated slot {} as latest in cache", name, latest);

        Ok(ExtractOutcome {
            fetched,
            persisted: inserted,
            pages: collection.pages,
            watermark: Some(latest),
        })
    }
}

/// Drop everything at or below the watermark, unusable payloads and repeats
///
/// A payload the store cannot hold or the aggregator cannot fold is skipped
/// here so it never reaches the store.
fn fresh_records(name: &str, records: Vec<BidRecord>, watermark: Option<u64>) -> Vec<BidRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| watermark.map_or(true, |mark| r.position() > mark))
        .filter(|r| match r.validate() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("⚠️  {}: skipping payload at slot {}: {}", name, r.position(), e);
                false
            }
        })
        .filter(|r| seen.insert((r.position(), r.block_hash.clone())))
        .collect()
}

#[async_trait]
impl SyncTask for Extractor {
    fn name(&self) -> &str {
        self.source_name()
    }

    async fn run_cycle(&self) -> Result<(), SyncError> {
        Extractor::run_cycle(self).await.map(|_| ())
    }
}
