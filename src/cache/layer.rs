//! Cache facade that owns TTL, time and the sync guard over a backend.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use color_eyre::Result;
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::memory::MemoryBackend;
use super::sqlite::SqliteBackend;
use super::traits::{CacheBackend, CacheEntry, Freshness, Lookup, ReadMode};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, Config};
use crate::stats::{CacheStats, LookupCounters};
use crate::sync::{CancelToken, RunGuard, SyncCoordinator, SyncError, SyncRun};
use crate::upstream::{CatalogClient, UpstreamError};

/// Failure of a read-through lookup.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error(transparent)]
  Upstream(#[from] UpstreamError),

  #[error("cache backend failure: {0}")]
  Backend(color_eyre::Report),
}

impl From<color_eyre::Report> for FetchError {
  fn from(err: color_eyre::Report) -> Self {
    FetchError::Backend(err)
  }
}

/// Application-facing cache.
///
/// Cheap to clone; clones share the backend, counters and sync guard. Build
/// one at startup and hand clones to request handlers and the sync task.
#[derive(Clone)]
pub struct CatalogCache {
  backend: Arc<dyn CacheBackend>,
  clock: Arc<dyn Clock>,
  /// How long an entry stays fresh after a write
  ttl: Duration,
  default_backoff: std::time::Duration,
  lookups: Arc<LookupCounters>,
  sync_running: Arc<AtomicBool>,
}

impl CatalogCache {
  /// Create a cache over the given backend.
  pub fn new(backend: impl CacheBackend + 'static, ttl: Duration) -> Self {
    Self::with_backend(Arc::new(backend), ttl)
  }

  pub fn with_backend(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
    Self {
      backend,
      clock: Arc::new(SystemClock),
      ttl,
      default_backoff: std::time::Duration::from_secs(10),
      lookups: Arc::new(LookupCounters::default()),
      sync_running: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Build the backend named by the configuration.
  pub fn from_config(config: &Config) -> Result<Self> {
    let backend: Arc<dyn CacheBackend> = match config.cache.backend {
      BackendKind::Memory => Arc::new(MemoryBackend::new(config.cache.max_size)),
      BackendKind::Sqlite => match &config.cache.path {
        Some(path) => Arc::new(SqliteBackend::open(path)?),
        None => Arc::new(SqliteBackend::open_default()?),
      },
    };

    info!(
      backend = backend.name(),
      ttl_secs = config.cache.ttl_secs,
      "Cache initialized"
    );

    Ok(
      Self::with_backend(backend, config.cache.ttl())
        .with_default_backoff(config.sync.default_backoff()),
    )
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Backoff used when a rate-limit signal carries no wait time.
  pub fn with_default_backoff(mut self, backoff: std::time::Duration) -> Self {
    self.default_backoff = backoff;
    self
  }

  pub fn backend_name(&self) -> &'static str {
    self.backend.name()
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Current time at the microsecond precision the durable backend keeps.
  pub(crate) fn now(&self) -> DateTime<Utc> {
    self.clock.now().trunc_subsecs(6)
  }

  /// Look up a key.
  ///
  /// Expired entries come back as stale hits unless `mode` is
  /// [`ReadMode::FreshOnly`].
  pub fn get(&self, key: &str, mode: ReadMode) -> Result<Lookup> {
    let lookup = match self.backend.get(key)? {
      Some(entry) => {
        let freshness = entry.freshness(self.now());
        match (freshness, mode) {
          (Freshness::Expired, ReadMode::FreshOnly) => Lookup::Miss,
          _ => Lookup::Hit { entry, freshness },
        }
      }
      None => Lookup::Miss,
    };

    match lookup.freshness() {
      Some(Freshness::Fresh) => self.lookups.record_fresh(),
      Some(Freshness::Expired) => self.lookups.record_stale(),
      None => self.lookups.record_miss(),
    }
    debug!(key = key, freshness = ?lookup.freshness(), "Cache lookup");

    Ok(lookup)
  }

  /// Store a payload, replacing any existing entry and restarting its TTL.
  pub fn put(&self, key: &str, payload: Value) -> Result<()> {
    let entry = CacheEntry::new(key, payload, self.now(), self.ttl);
    self.backend.put(entry)
  }

  /// Drop a key. Absent keys are fine.
  pub fn invalidate(&self, key: &str) -> Result<()> {
    self.backend.invalidate(key)
  }

  /// Write a batch stamped with the current time. Returns the batch size.
  pub(crate) fn bulk_put(&self, items: Vec<(String, Value)>) -> Result<usize> {
    if items.is_empty() {
      return Ok(0);
    }
    let now = self.now();
    let entries: Vec<CacheEntry> = items
      .into_iter()
      .map(|(key, payload)| CacheEntry::new(key, payload, now, self.ttl))
      .collect();
    let count = entries.len();
    self.backend.bulk_put(entries)?;
    Ok(count)
  }

  /// True when `key` is cached and not yet expired. Not counted as a lookup.
  pub(crate) fn is_fresh(&self, key: &str) -> Result<bool> {
    Ok(
      self
        .backend
        .get(key)?
        .map(|entry| entry.is_fresh(self.now()))
        .unwrap_or(false),
    )
  }

  /// Physically remove expired entries.
  pub fn purge_expired(&self) -> Result<usize> {
    let removed = self.backend.purge_expired(self.now())?;
    info!(removed = removed, "Purged expired entries");
    Ok(removed)
  }

  /// Current health snapshot including lookup counters.
  pub fn stats(&self) -> Result<CacheStats> {
    let mut stats = self.backend.stats(self.now())?;
    stats.lookups = self.lookups.snapshot();
    Ok(stats)
  }

  /// Populate the cache with up to `requested` popular items.
  ///
  /// Runs to completion or abort. A concurrent call fails with
  /// [`SyncError::AlreadyRunning`] instead of queueing.
  pub async fn trigger_sync<C: CatalogClient>(
    &self,
    client: &C,
    requested: usize,
    cancel: &CancelToken,
  ) -> Result<SyncRun, SyncError> {
    let _guard = RunGuard::acquire(&self.sync_running)?;

    let run = SyncCoordinator::new(self, client, self.default_backoff)
      .run(requested, cancel)
      .await?;

    match self.stats() {
      Ok(stats) => info!(
        total = stats.total_entries,
        valid = stats.valid_entries,
        expired = stats.expired_entries,
        "Post-sync cache state"
      ),
      Err(err) => warn!(error = %err, "Failed to collect post-sync stats"),
    }

    Ok(run)
  }

  /// Read-through lookup.
  ///
  /// 1. Fresh hit: returned as is
  /// 2. Miss: fetched upstream and stored
  /// 3. Stale hit: refreshed upstream, or served stale if upstream fails
  ///
  /// Upstream `NotFound` is reported as a miss.
  pub async fn fetch_through<C: CatalogClient>(
    &self,
    key: &str,
    client: &C,
  ) -> Result<Lookup, FetchError> {
    let cached = self.get(key, ReadMode::AllowStale)?;
    if cached.freshness() == Some(Freshness::Fresh) {
      return Ok(cached);
    }

    let fetched = client.fetch_by_id(key).await.and_then(|item| {
      item
        .to_payload()
        .map_err(|e| UpstreamError::Decode(e.to_string()))
    });

    match fetched {
      Ok(payload) => {
        let entry = CacheEntry::new(key, payload, self.now(), self.ttl);
        self.backend.put(entry.clone())?;
        Ok(Lookup::Hit {
          entry,
          freshness: Freshness::Fresh,
        })
      }
      Err(UpstreamError::NotFound(_)) => {
        // Upstream no longer knows the item; drop whatever we had
        if !cached.is_miss() {
          self.backend.invalidate(key)?;
        }
        Ok(Lookup::Miss)
      }
      Err(err) if !cached.is_miss() => {
        warn!(key = key, error = %err, "Upstream refresh failed, serving stale entry");
        Ok(cached)
      }
      Err(err) => Err(err.into()),
    }
  }
}
