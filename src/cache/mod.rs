//! Catalog metadata cache.
//!
//! This module provides:
//! - One backend contract with an in-memory and a SQLite implementation
//! - TTL freshness with stale-serving reads
//! - Insertion-age eviction for the bounded in-memory backend
//! - Read-through lookups with offline fallback

mod layer;
mod memory;
mod sqlite;
mod traits;

pub use layer::{CatalogCache, FetchError};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{CacheBackend, CacheEntry, Freshness, Lookup, ReadMode};
