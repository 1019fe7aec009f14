//! Relay payload collector and statistics aggregator.
//!
//! Pulls delivered-payload bid traces from MEV-boost relays into SQLite
//! and keeps a running statistics summary in a key-value cache for the
//! dashboard. See [`pipeline`] for the moving parts.

pub mod pipeline;
