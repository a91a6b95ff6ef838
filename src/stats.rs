//! Cache health statistics.
//!
//! Everything here is derived from backend state without mutating it. The
//! in-memory backend folds its entries through [`StatsAccumulator`]; the
//! SQLite backend produces the same numbers from one aggregate query.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of cache health.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
  pub total_entries: usize,
  /// Entries still fresh at the time of the snapshot
  pub valid_entries: usize,
  pub expired_entries: usize,
  /// Capacity bound; `None` for backends bounded by storage only
  pub max_size: Option<usize>,
  /// Oldest `fetched_at` among all entries
  pub oldest_entry: Option<DateTime<Utc>>,
  /// Lookup outcomes since the cache was constructed
  pub lookups: LookupSnapshot,
}

impl CacheStats {
  /// Remaining capacity before eviction kicks in.
  pub fn headroom(&self) -> Option<usize> {
    self
      .max_size
      .map(|max| max.saturating_sub(self.total_entries))
  }

  /// Fraction of capacity in use, 0.0..=1.0.
  pub fn fill_ratio(&self) -> Option<f64> {
    self.max_size.map(|max| {
      if max == 0 {
        1.0
      } else {
        self.total_entries as f64 / max as f64
      }
    })
  }

  /// Fraction of entries that are expired.
  pub fn expired_ratio(&self) -> f64 {
    if self.total_entries == 0 {
      0.0
    } else {
      self.expired_entries as f64 / self.total_entries as f64
    }
  }
}

impl fmt::Display for CacheStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "entries:   {}", self.total_entries)?;
    writeln!(f, "  valid:   {}", self.valid_entries)?;
    writeln!(
      f,
      "  expired: {} ({:.1}%)",
      self.expired_entries,
      self.expired_ratio() * 100.0
    )?;
    match (self.max_size, self.headroom(), self.fill_ratio()) {
      (Some(max), Some(headroom), Some(fill)) => writeln!(
        f,
        "capacity:  {} ({:.1}% full, headroom {})",
        max,
        fill * 100.0,
        headroom
      )?,
      _ => writeln!(f, "capacity:  unbounded")?,
    }
    match self.oldest_entry {
      Some(oldest) => writeln!(f, "oldest:    {}", oldest.to_rfc3339())?,
      None => writeln!(f, "oldest:    -")?,
    }
    write!(
      f,
      "lookups:   {} fresh, {} stale, {} miss ({:.1}% hit)",
      self.lookups.fresh_hits,
      self.lookups.stale_hits,
      self.lookups.misses,
      self.lookups.hit_rate()
    )
  }
}

/// Single pass fold over entry timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAccumulator {
  total: usize,
  valid: usize,
  oldest: Option<DateTime<Utc>>,
}

impl StatsAccumulator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Account for one entry.
  pub fn observe(
    &mut self,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) {
    self.total += 1;
    if now < expires_at {
      self.valid += 1;
    }
    self.oldest = Some(match self.oldest {
      Some(oldest) if oldest <= fetched_at => oldest,
      _ => fetched_at,
    });
  }

  pub fn finish(self, max_size: Option<usize>) -> CacheStats {
    CacheStats {
      total_entries: self.total,
      valid_entries: self.valid,
      expired_entries: self.total - self.valid,
      max_size,
      oldest_entry: self.oldest,
      lookups: LookupSnapshot::default(),
    }
  }
}

/// Lookup outcome counters, updated on every facade read.
#[derive(Debug, Default)]
pub struct LookupCounters {
  fresh_hits: AtomicU64,
  stale_hits: AtomicU64,
  misses: AtomicU64,
}

impl LookupCounters {
  pub fn record_fresh(&self) {
    self.fresh_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_stale(&self) {
    self.stale_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_miss(&self) {
    self.misses.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> LookupSnapshot {
    LookupSnapshot {
      fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
      stale_hits: self.stale_hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LookupSnapshot {
  pub fresh_hits: u64,
  pub stale_hits: u64,
  pub misses: u64,
}

impl LookupSnapshot {
  /// Percentage of lookups answered from cache (fresh or stale).
  pub fn hit_rate(&self) -> f64 {
    let hits = self.fresh_hits + self.stale_hits;
    let total = hits + self.misses;
    if total == 0 {
      0.0
    } else {
      hits as f64 / total as f64 * 100.0
    }
  }
}
