//! Metadata cache in front of a rate-limited movie/show catalog API.
//!
//! [`CatalogCache`] serves lookups from an in-memory or SQLite backend and
//! pre-populates itself from the upstream popular listing with
//! [`CatalogCache::trigger_sync`].

pub mod cache;
pub mod clock;
pub mod config;
pub mod logging;
pub mod stats;
pub mod sync;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheBackend, CacheEntry, CatalogCache, Freshness, Lookup, ReadMode};
pub use stats::CacheStats;
pub use sync::{CancelToken, SyncError, SyncRun};
