//! SQLite cache backend.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{CacheBackend, CacheEntry};
use crate::stats::{CacheStats, LookupSnapshot};

/// Fixed-width UTC timestamps so that text order equals time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_cache (
    key TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_catalog_cache_expires
    ON catalog_cache(expires_at);

CREATE INDEX IF NOT EXISTS idx_catalog_cache_fetched
    ON catalog_cache(fetched_at);
"#;

const UPSERT_ENTRY: &str = "INSERT INTO catalog_cache (key, payload, fetched_at, expires_at)
   VALUES (?1, ?2, ?3, ?4)
   ON CONFLICT(key) DO UPDATE SET
     payload = excluded.payload,
     fetched_at = excluded.fetched_at,
     expires_at = excluded.expires_at";

/// SQLite-based durable cache.
///
/// Capacity is bounded by storage, not enforced here. Concurrency is left to
/// SQLite: every bulk write is one transaction so readers never see half a
/// batch.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
      .map_err(|e| eyre!("Failed to enable WAL journal: {}", e))?;
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    info!(path = %path.display(), "Opened SQLite cache");
    Ok(backend)
  }

  /// Open a private in-memory database. Contents vanish on drop.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("reelcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheBackend for SqliteBackend {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare_cached(
        "SELECT payload, fetched_at, expires_at FROM catalog_cache
         WHERE key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, String, String)> = stmt
      .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((payload, fetched_at, expires_at)) => {
        let payload = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize payload for {}: {}", key, e))?;
        Ok(Some(CacheEntry {
          key: key.to_string(),
          payload,
          fetched_at: parse_datetime(&fetched_at)?,
          expires_at: parse_datetime(&expires_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, entry: CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let payload = serde_json::to_string(&entry.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        UPSERT_ENTRY,
        params![
          entry.key,
          payload,
          format_datetime(entry.fetched_at),
          format_datetime(entry.expires_at)
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", entry.key, e))?;

    Ok(())
  }

  fn invalidate(&self, key: &str) -> Result<()> {
    let removed = self
      .lock()?
      .execute("DELETE FROM catalog_cache WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to invalidate {}: {}", key, e))?;

    if removed > 0 {
      debug!(key = key, "Invalidated cache entry");
    }
    Ok(())
  }

  fn bulk_put(&self, entries: Vec<CacheEntry>) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    {
      let mut stmt = tx
        .prepare_cached(UPSERT_ENTRY)
        .map_err(|e| eyre!("Failed to prepare upsert: {}", e))?;

      for entry in &entries {
        let payload = serde_json::to_string(&entry.payload)
          .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
        stmt
          .execute(params![
            entry.key,
            payload,
            format_datetime(entry.fetched_at),
            format_datetime(entry.expires_at)
          ])
          .map_err(|e| eyre!("Failed to store entry {}: {}", entry.key, e))?;
      }
    }

    tx
      .commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(count = entries.len(), "Bulk stored entries in SQLite");
    Ok(())
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM catalog_cache WHERE expires_at <= ?",
        params![format_datetime(now)],
      )
      .map_err(|e| eyre!("Failed to purge expired entries: {}", e))?;

    Ok(removed)
  }

  fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats> {
    let conn = self.lock()?;

    let (total, valid, oldest): (i64, i64, Option<String>) = conn
      .query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN expires_at > ?1 THEN 1 ELSE 0 END), 0),
                MIN(fetched_at)
         FROM catalog_cache",
        params![format_datetime(now)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .map_err(|e| eyre!("Failed to compute cache stats: {}", e))?;

    let total = total as usize;
    let valid = valid as usize;
    Ok(CacheStats {
      total_entries: total,
      valid_entries: valid,
      expired_entries: total - valid,
      max_size: None,
      oldest_entry: oldest.as_deref().map(parse_datetime).transpose()?,
      lookups: LookupSnapshot::default(),
    })
  }

  fn max_size(&self) -> Option<usize> {
    None
  }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_datetime`].
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
