//! Key-value cache holding relay watermarks and the stats summary
//!
//! Keys:
//! - `<relay name>` → highest slot persisted for that relay (decimal string)
//! - `stats` → serialized [`RunningStatistics`](super::types::RunningStatistics)

use super::db::{apply_wal_pragmas, ensure_parent_dir, run_schema_migrations, Migration};
use super::error::CacheError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;

/// Cache key of the statistics summary
pub const STATS_KEY: &str = "stats";

/// Schema for the key-value table
pub const CACHE_MIGRATIONS: &[Migration] = &[Migration {
    name: "02_kv_cache.sql",
    sql: include_str!("../../sql/02_kv_cache.sql"),
}];

/// String key-value store
///
/// `set` returning `Ok` means the write was acknowledged.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// Read a relay's watermark; a value that is not a slot number is an error
pub async fn read_watermark(
    cache: &dyn KeyValueCache,
    source_name: &str,
) -> Result<Option<u64>, CacheError> {
    match cache.get(source_name).await? {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CacheError::InvalidWatermark {
                key: source_name.to_string(),
                value: raw,
            }),
    }
}

pub async fn write_watermark(
    cache: &dyn KeyValueCache,
    source_name: &str,
    position: u64,
) -> Result<(), CacheError> {
    cache.set(source_name, &position.to_string()).await
}

/// SQLite-backed [`KeyValueCache`]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, CacheError> {
        ensure_parent_dir(db_path.as_ref())?;
        let conn = Connection::open(db_path.as_ref())?;
        apply_wal_pragmas(&conn)?;
        run_schema_migrations(&conn, CACHE_MIGRATIONS)?;

        log::info!("✅ Cache ready: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn get_blocking(&self, key: &str) -> Result<Option<String>, CacheError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv_cache WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_blocking(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.get_blocking(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.set_blocking(key, value)
    }
}

/// Process-local cache; contents are lost on exit
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
