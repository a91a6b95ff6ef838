//! Bounded in-process cache backend.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::traits::{CacheBackend, CacheEntry};
use crate::stats::{CacheStats, StatsAccumulator};

/// In-memory backend with insertion-age eviction.
///
/// When a new key would push the map past `max_size`, the entry with the
/// oldest `fetched_at` is dropped first; ties go to the smallest key.
/// Overwriting an existing key never evicts.
pub struct MemoryBackend {
  state: Mutex<State>,
  max_size: usize,
}

#[derive(Default)]
struct State {
  entries: HashMap<String, CacheEntry>,
  /// Eviction order: (fetched_at, key), smallest first
  by_age: BTreeSet<(DateTime<Utc>, String)>,
}

impl State {
  fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    let entry = self.entries.remove(key)?;
    self.by_age.remove(&(entry.fetched_at, entry.key.clone()));
    Some(entry)
  }

  fn evict_oldest(&mut self) -> Option<CacheEntry> {
    let (_, key) = self.by_age.pop_first()?;
    self.entries.remove(&key)
  }

  fn insert(&mut self, entry: CacheEntry, max_size: usize) {
    if self.remove(&entry.key).is_none() {
      while self.entries.len() >= max_size {
        match self.evict_oldest() {
          Some(evicted) => debug!(key = %evicted.key, "Evicted oldest cache entry"),
          None => break,
        }
      }
    }
    self.by_age.insert((entry.fetched_at, entry.key.clone()));
    self.entries.insert(entry.key.clone(), entry);
  }
}

impl MemoryBackend {
  /// Create an empty backend holding at most `max_size` entries (minimum 1).
  pub fn new(max_size: usize) -> Self {
    Self {
      state: Mutex::new(State::default()),
      max_size: max_size.max(1),
    }
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.lock()?.entries.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  fn lock(&self) -> Result<MutexGuard<'_, State>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheBackend for MemoryBackend {
  fn name(&self) -> &'static str {
    "memory"
  }

  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let state = self.lock()?;
    Ok(state.entries.get(key).cloned())
  }

  fn put(&self, entry: CacheEntry) -> Result<()> {
    trace!(key = %entry.key, "Storing entry in memory");
    self.lock()?.insert(entry, self.max_size);
    Ok(())
  }

  fn invalidate(&self, key: &str) -> Result<()> {
    if self.lock()?.remove(key).is_some() {
      debug!(key = key, "Invalidated cache entry");
    }
    Ok(())
  }

  fn bulk_put(&self, entries: Vec<CacheEntry>) -> Result<()> {
    let count = entries.len();
    let mut state = self.lock()?;
    for entry in entries {
      state.insert(entry, self.max_size);
    }
    debug!(count = count, "Bulk stored entries in memory");
    Ok(())
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let mut state = self.lock()?;
    let expired: Vec<String> = state
      .entries
      .values()
      .filter(|e| !e.is_fresh(now))
      .map(|e| e.key.clone())
      .collect();
    for key in &expired {
      state.remove(key);
    }
    Ok(expired.len())
  }

  fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats> {
    let state = self.lock()?;
    let mut acc = StatsAccumulator::new();
    for entry in state.entries.values() {
      acc.observe(entry.fetched_at, entry.expires_at, now);
    }
    Ok(acc.finish(Some(self.max_size)))
  }

  fn max_size(&self) -> Option<usize> {
    Some(self.max_size)
  }
}
