//! Relay data API client
//!
//! ## API Reference
//!
//! Endpoint: `{relay}/relay/v1/data/bidtraces/proposer_payload_delivered?limit=100[&cursor=SLOT]`
//! Returns: payloads delivered to proposers, newest slot first, at most
//! `limit` per page. `cursor` restricts the page to slots <= SLOT.

use super::error::FeedError;
use super::types::BidRecord;
use async_trait::async_trait;
use std::time::Duration;

/// Records requested per page
pub const PAGE_SIZE: usize = 100;

/// Path of the delivered-payloads endpoint on a relay
pub const DEFAULT_RELAY_PATH: &str = "/relay/v1/data/bidtraces/proposer_payload_delivered";

/// Paginated, newest-first payload feed of one relay
#[async_trait]
pub trait PayloadFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch one page of at most [`PAGE_SIZE`] records at or below `cursor`
    async fn fetch_page(&self, cursor: Option<u64>) -> Result<Vec<BidRecord>, FeedError>;
}

/// HTTP [`PayloadFeed`] for a MEV-boost relay
pub struct RelayClient {
    name: String,
    base_url: String,
    path: String,
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            path: path.into(),
            client,
        })
    }

    pub fn page_url(&self, cursor: Option<u64>) -> String {
        match cursor {
            Some(cursor) => format!(
                "{}{}?limit={}&cursor={}",
                self.base_url, self.path, PAGE_SIZE, cursor
            ),
            None => format!("{}{}?limit={}", self.base_url, self.path, PAGE_SIZE),
        }
    }
}

#[async_trait]
impl PayloadFeed for RelayClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, cursor: Option<u64>) -> Result<Vec<BidRecord>, FeedError> {
        let response = self.client.get(self.page_url(cursor)).send().await?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                status: response.status().as_u16(),
            });
        }

        let page: Vec<BidRecord> = response.json().await?;

        match (page.first(), page.last()) {
            (Some(newest), Some(oldest)) => log::info!(
                "{}: Collected {} payloads ({} -> {})",
                self.name,
                page.len(),
                newest.slot,
                oldest.slot
            ),
            _ => log::info!("{}: No payloads in response", self.name),
        }

        Ok(page)
    }
}
