//! Record store: append-only payload table in SQLite
//!
//! The store does not enforce uniqueness of (relay, slot, block_hash);
//! the extractor's watermark discipline is what keeps ingestion
//! exactly-once.

use super::error::StoreError;
use super::types::PersistedRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Embedded schema file
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema for the payload table
pub const STORE_MIGRATIONS: &[Migration] = &[Migration {
    name: "01_payloads.sql",
    sql: include_str!("../../sql/01_payloads.sql"),
}];

/// Position predicate for [`RecordQuery`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionFilter {
    /// position > X
    After(u64),
    /// position >= X
    AtOrAfter(u64),
}

/// Query over stored payloads, always ordered by position descending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub filter: PositionFilter,
    /// Keep only the first-inserted row for each position
    pub distinct_by_position: bool,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn after(position: u64) -> Self {
        Self {
            filter: PositionFilter::After(position),
            distinct_by_position: false,
            limit: None,
        }
    }

    pub fn at_or_after(position: u64) -> Self {
        Self {
            filter: PositionFilter::AtOrAfter(position),
            distinct_by_position: false,
            limit: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct_by_position = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Durable payload store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert all records, returning how many rows were written
    async fn insert_many(&self, records: &[PersistedRecord]) -> Result<usize, StoreError>;

    async fn find_many(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>, StoreError>;
}

/// Switch on WAL so the aggregator can read while extractors write
pub fn apply_wal_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Run embedded schema migrations in order
///
/// Every file uses IF NOT EXISTS clauses, so running twice is harmless.
pub fn run_schema_migrations(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<(), rusqlite::Error> {
    for migration in migrations {
        log::debug!("   ├─ Executing: {}", migration.name);
        conn.execute_batch(migration.sql)?;
    }
    log::info!("✅ Applied {} schema migration(s)", migrations.len());
    Ok(())
}

/// Create the directory a database file lives in
pub(crate) fn ensure_parent_dir(db_path: &Path) -> Result<(), std::io::Error> {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// SQLite-backed [`RecordStore`]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) the payload database and bring its schema up to date
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        ensure_parent_dir(db_path.as_ref())?;
        let conn = Connection::open(db_path.as_ref())?;
        apply_wal_pragmas(&conn)?;
        run_schema_migrations(&conn, STORE_MIGRATIONS)?;

        log::info!("✅ Record store ready: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn insert_blocking(&self, records: &[PersistedRecord]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO payloads
                 (relay, slot, parent_hash, block_hash, builder_pubkey, proposer_pubkey,
                  proposer_fee_recipient, gas_limit, gas_used, value, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            for record in records {
                inserted += stmt.execute(params![
                    record.source_name,
                    record.position,
                    record.parent_hash,
                    record.block_hash,
                    record.builder_pubkey,
                    record.proposer_pubkey,
                    record.proposer_fee_recipient,
                    record.gas_limit,
                    record.gas_used,
                    record.value,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn find_blocking(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>, StoreError> {
        let conn = self.lock()?;

        let (predicate, position) = match query.filter {
            PositionFilter::After(p) => ("slot > ?1", p),
            PositionFilter::AtOrAfter(p) => ("slot >= ?1", p),
        };

        let distinct = if query.distinct_by_position {
            format!(" AND id IN (SELECT MIN(id) FROM payloads WHERE {} GROUP BY slot)", predicate)
        } else {
            String::new()
        };

        let sql = format!(
            "SELECT relay, slot, parent_hash, block_hash, builder_pubkey, proposer_pubkey,
                    proposer_fee_recipient, gas_limit, gas_used, value
             FROM payloads
             WHERE {}{}
             ORDER BY slot DESC, id ASC
             LIMIT ?2",
            predicate, distinct
        );

        // SQLite treats a negative LIMIT as "no limit"
        let limit: i64 = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![position, limit], |row| {
            Ok(PersistedRecord {
                source_name: row.get(0)?,
                position: row.get(1)?,
                parent_hash: row.get(2)?,
                block_hash: row.get(3)?,
                builder_pubkey: row.get(4)?,
                proposer_pubkey: row.get(5)?,
                proposer_fee_recipient: row.get(6)?,
                gas_limit: row.get(7)?,
                gas_used: row.get(8)?,
                value: row.get(9)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_many(&self, records: &[PersistedRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.insert_blocking(records)
    }

    async fn find_many(&self, query: &RecordQuery) -> Result<Vec<PersistedRecord>, StoreError> {
        self.find_blocking(query)
    }
}
