//! Core types and the backend contract for the caching system.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;

use crate::stats::CacheStats;

/// A cached catalog document.
///
/// Entries are only ever created by a successful write, so `fetched_at` is
/// always set and `expires_at` is always after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
  /// External catalog id
  pub key: String,
  /// Normalized metadata document
  pub payload: Value,
  /// When the entry was last written
  pub fetched_at: DateTime<Utc>,
  /// `fetched_at + ttl`
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Build an entry written at `fetched_at` that lives for `ttl`.
  pub fn new(
    key: impl Into<String>,
    payload: Value,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
  ) -> Self {
    Self {
      key: key.into(),
      payload,
      fetched_at,
      expires_at: fetched_at + ttl,
    }
  }

  pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
    if now < self.expires_at {
      Freshness::Fresh
    } else {
      Freshness::Expired
    }
  }

  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    self.freshness(now) == Freshness::Fresh
  }
}

/// Derived state of an entry relative to "now". Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
  Fresh,
  Expired,
}

/// How a read treats expired entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
  /// Serve expired entries as stale answers
  #[default]
  AllowStale,
  /// Report expired entries as a miss
  FreshOnly,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
  Hit { entry: CacheEntry, freshness: Freshness },
  Miss,
}

impl Lookup {
  pub fn entry(&self) -> Option<&CacheEntry> {
    match self {
      Lookup::Hit { entry, .. } => Some(entry),
      Lookup::Miss => None,
    }
  }

  pub fn into_entry(self) -> Option<CacheEntry> {
    match self {
      Lookup::Hit { entry, .. } => Some(entry),
      Lookup::Miss => None,
    }
  }

  pub fn freshness(&self) -> Option<Freshness> {
    match self {
      Lookup::Hit { freshness, .. } => Some(*freshness),
      Lookup::Miss => None,
    }
  }

  pub fn is_miss(&self) -> bool {
    matches!(self, Lookup::Miss)
  }
}

/// Storage contract shared by the in-memory and SQLite backends.
///
/// Backends store and return entries as written; freshness is decided by the
/// caller against its own clock.
pub trait CacheBackend: Send + Sync {
  /// Short backend name for logs ("memory", "sqlite").
  fn name(&self) -> &'static str;

  /// Get an entry by key, expired or not.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or overwrite a single entry.
  fn put(&self, entry: CacheEntry) -> Result<()>;

  /// Remove an entry. Absent keys are not an error.
  fn invalidate(&self, key: &str) -> Result<()>;

  /// Upsert a batch of entries in one write.
  fn bulk_put(&self, entries: Vec<CacheEntry>) -> Result<()>;

  /// Remove every entry that is expired at `now`, returning how many went.
  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

  /// Read-only health snapshot at `now`.
  fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats>;

  /// Capacity bound, if the backend enforces one.
  fn max_size(&self) -> Option<usize>;
}
