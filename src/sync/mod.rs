//! Bulk population of the cache from the upstream popular listing.
//!
//! A run walks listing pages in order, skips items that are already cached
//! and fresh, completes summary-only items through the detail endpoint, and
//! writes each page's items in one batch. Upstream trouble is absorbed:
//! per-item failures become counters, and a page that stays rate limited
//! after one retry ends the run with a partial report.

mod run;

use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::CatalogCache;
use crate::upstream::{CatalogClient, CatalogItem, PopularPage, UpstreamError};

pub use run::{AbortReason, CancelToken, SyncError, SyncOutcome, SyncRun};
pub(crate) use run::RunGuard;

/// What happened to one listing item.
enum ItemResult {
  Ready(String, Value),
  Skipped,
  Failed,
  Fatal(UpstreamError),
}

/// Drives one sync run against a cache and a catalog client.
pub struct SyncCoordinator<'a, C: CatalogClient> {
  cache: &'a CatalogCache,
  client: &'a C,
  default_backoff: Duration,
}

impl<'a, C: CatalogClient> SyncCoordinator<'a, C> {
  pub fn new(cache: &'a CatalogCache, client: &'a C, default_backoff: Duration) -> Self {
    Self {
      cache,
      client,
      default_backoff,
    }
  }

  /// Sync up to `requested` items, stopping early on cancellation, upstream
  /// exhaustion or an unrecoverable upstream error.
  ///
  /// Only backend failures are returned as errors.
  pub async fn run(&self, requested: usize, cancel: &CancelToken) -> Result<SyncRun, SyncError> {
    let mut run = SyncRun::start(requested, self.cache.now());
    let page_size = self.client.page_size().max(1);
    // The listing API numbers pages with u32; nothing serves past that
    let last_page = u32::try_from(requested.div_ceil(page_size)).unwrap_or(u32::MAX);
    let mut seen: HashSet<String> = HashSet::new();

    info!(
      requested = requested,
      page_size = page_size,
      pages = last_page,
      backend = self.cache.backend_name(),
      "Starting catalog sync"
    );

    let mut outcome = SyncOutcome::Completed;
    for page in 1..=last_page {
      if cancel.is_cancelled() {
        info!(page = page, "Sync cancelled at page boundary");
        outcome = SyncOutcome::Cancelled;
        break;
      }

      let listing = match self.fetch_page(page).await {
        Ok(listing) => listing,
        Err(reason) => {
          warn!(page = page, reason = %reason, "Aborting sync");
          outcome = SyncOutcome::Aborted { reason };
          break;
        }
      };
      run.pages_fetched += 1;

      let has_more = listing.has_more;
      let mut batch: Vec<(String, Value)> = Vec::with_capacity(listing.items.len());
      let mut fatal = None;

      for item in listing.items {
        if run.processed >= requested {
          break;
        }
        run.processed += 1;

        match self.process_item(item, &mut seen).await? {
          ItemResult::Ready(key, payload) => batch.push((key, payload)),
          ItemResult::Skipped => run.skipped_duplicate += 1,
          ItemResult::Failed => run.failed += 1,
          ItemResult::Fatal(err) => {
            run.failed += 1;
            fatal = Some(err);
            break;
          }
        }
      }

      // Flush whatever this page produced, even when aborting
      run.succeeded += self.cache.bulk_put(batch)?;

      debug!(
        page = page,
        processed = run.processed,
        succeeded = run.succeeded,
        failed = run.failed,
        skipped = run.skipped_duplicate,
        "Sync page done"
      );

      if let Some(err) = fatal {
        warn!(page = page, error = %err, "Aborting sync on fatal upstream error");
        outcome = SyncOutcome::Aborted {
          reason: AbortReason::Unauthorized {
            message: err.to_string(),
          },
        };
        break;
      }
      if run.processed >= requested {
        break;
      }
      if !has_more {
        outcome = SyncOutcome::Exhausted;
        break;
      }
    }

    let run = run.finish(outcome, self.cache.now());
    if run.is_aborted() {
      warn!(summary = %run, "Catalog sync aborted");
    } else {
      info!(summary = %run, "Catalog sync finished");
    }
    Ok(run)
  }

  /// Fetch one listing page, retrying once after a rate-limit backoff.
  async fn fetch_page(&self, page: u32) -> Result<PopularPage, AbortReason> {
    match self.client.fetch_popular_page(page).await {
      Ok(listing) => Ok(listing),
      Err(err) if err.is_rate_limited() => {
        let wait = err.retry_after().unwrap_or(self.default_backoff);
        warn!(
          page = page,
          wait_ms = wait.as_millis() as u64,
          "Listing rate limited, backing off"
        );
        tokio::time::sleep(wait).await;

        match self.client.fetch_popular_page(page).await {
          Ok(listing) => Ok(listing),
          Err(err) if err.is_rate_limited() => Err(AbortReason::RateLimited { page }),
          Err(err) => Err(page_abort_reason(page, err)),
        }
      }
      Err(err) => Err(page_abort_reason(page, err)),
    }
  }

  async fn process_item(
    &self,
    item: CatalogItem,
    seen: &mut HashSet<String>,
  ) -> Result<ItemResult, SyncError> {
    let key = item.id.trim().to_string();

    if !key.is_empty() {
      if !seen.insert(key.clone()) {
        debug!(key = %key, "Item repeated within sync run");
        return Ok(ItemResult::Skipped);
      }
      if self.cache.is_fresh(&key)? {
        debug!(key = %key, "Item already cached and fresh");
        return Ok(ItemResult::Skipped);
      }
    }

    let item = if item.is_summary() && !key.is_empty() {
      match self.client.fetch_by_id(&key).await {
        Ok(full) => full,
        Err(err) if err.is_fatal() => return Ok(ItemResult::Fatal(err)),
        Err(err) if err.is_rate_limited() => {
          let wait = err.retry_after().unwrap_or(self.default_backoff);
          warn!(
            key = %key,
            wait_ms = wait.as_millis() as u64,
            "Detail fetch rate limited, skipping item"
          );
          tokio::time::sleep(wait).await;
          return Ok(ItemResult::Failed);
        }
        Err(err) => {
          warn!(key = %key, error = %err, "Detail fetch failed, skipping item");
          return Ok(ItemResult::Failed);
        }
      }
    } else {
      item
    };

    match item.to_payload() {
      Ok(payload) => Ok(ItemResult::Ready(key, payload)),
      Err(err) => {
        warn!(error = %err, "Item normalization failed, skipping item");
        Ok(ItemResult::Failed)
      }
    }
  }
}

fn page_abort_reason(page: u32, err: UpstreamError) -> AbortReason {
  if err.is_fatal() {
    AbortReason::Unauthorized {
      message: err.to_string(),
    }
  } else {
    AbortReason::Upstream {
      page,
      message: err.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryBackend, SqliteBackend};
  use crate::testing::{full, summary, ScriptedCatalog};
  use chrono::Duration as ChronoDuration;
  use serde_json::json;

  const BACKOFF: Duration = Duration::from_secs(5);

  fn memory_cache() -> CatalogCache {
    CatalogCache::new(MemoryBackend::new(1_000), ChronoDuration::hours(1))
  }

  async fn sync(cache: &CatalogCache, client: &ScriptedCatalog, requested: usize) -> SyncRun {
    SyncCoordinator::new(cache, client, BACKOFF)
      .run(requested, &CancelToken::new())
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn test_stops_after_requested_count() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(40, 4);

    let run = sync(&cache, &client, 10).await;

    assert_eq!(client.page_calls(), vec![1, 2, 3]);
    assert_eq!(run.pages_fetched, 3);
    assert_eq!(run.processed, 10);
    assert_eq!(run.succeeded, 10);
    assert_eq!(run.failed, 0);
    assert_eq!(run.outcome, SyncOutcome::Completed);
    assert!(run.finished_at.is_some());
    assert_eq!(cache.stats().unwrap().total_entries, 10);
    // Last page only had its first two items considered
    assert_eq!(client.detail_calls().len(), 10);
  }

  #[tokio::test(start_paused = true)]
  async fn test_double_rate_limit_aborts_with_partial_report() {
    let cache = memory_cache();
    let limited = UpstreamError::RateLimited { retry_after: None };
    let client = ScriptedCatalog::popular(20, 4).fail_page(2, limited, 2);

    let run = sync(&cache, &client, 20).await;

    assert_eq!(client.page_calls(), vec![1, 2, 2]);
    assert_eq!(
      run.outcome,
      SyncOutcome::Aborted {
        reason: AbortReason::RateLimited { page: 2 }
      }
    );
    assert_eq!(run.processed, 4);
    assert_eq!(run.succeeded, 4);
    assert_eq!(cache.stats().unwrap().total_entries, 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_single_rate_limit_waits_and_retries() {
    let cache = memory_cache();
    let limited = UpstreamError::RateLimited {
      retry_after: Some(Duration::from_secs(3)),
    };
    let client = ScriptedCatalog::popular(8, 4).fail_page(2, limited, 1);

    let started = tokio::time::Instant::now();
    let run = sync(&cache, &client, 8).await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < BACKOFF);
    assert_eq!(client.page_calls(), vec![1, 2, 2]);
    assert_eq!(run.succeeded, 8);
    assert_eq!(run.outcome, SyncOutcome::Completed);
  }

  #[tokio::test(start_paused = true)]
  async fn test_rate_limit_without_hint_uses_default_backoff() {
    let cache = memory_cache();
    let limited = UpstreamError::RateLimited { retry_after: None };
    let client = ScriptedCatalog::popular(4, 4).fail_page(1, limited, 1);

    let started = tokio::time::Instant::now();
    let run = sync(&cache, &client, 4).await;

    assert!(started.elapsed() >= BACKOFF);
    assert_eq!(run.succeeded, 4);
  }

  #[tokio::test]
  async fn test_fresh_entries_are_not_refetched() {
    let cache = memory_cache();
    cache.put("1", json!({ "id": "1" })).unwrap();
    cache.put("2", json!({ "id": "2" })).unwrap();
    let client = ScriptedCatalog::popular(4, 4);

    let run = sync(&cache, &client, 4).await;

    assert_eq!(run.skipped_duplicate, 2);
    assert_eq!(run.succeeded, 2);
    assert_eq!(client.detail_calls(), vec!["3".to_string(), "4".to_string()]);
    // Skipped entries keep their original payload
    let kept = cache.get("1", crate::cache::ReadMode::AllowStale).unwrap();
    assert_eq!(kept.entry().unwrap().payload, json!({ "id": "1" }));
  }

  #[tokio::test]
  async fn test_expired_entries_are_refreshed() {
    let clock = std::sync::Arc::new(crate::clock::ManualClock::new(crate::testing::epoch()));
    let cache = memory_cache().with_clock(clock.clone());
    cache.put("1", json!({ "stale": true })).unwrap();
    clock.advance(ChronoDuration::hours(2));
    let client = ScriptedCatalog::popular(2, 2);

    let run = sync(&cache, &client, 2).await;

    assert_eq!(run.skipped_duplicate, 0);
    assert_eq!(run.succeeded, 2);
    let refreshed = cache.get("1", crate::cache::ReadMode::FreshOnly).unwrap();
    assert_eq!(
      refreshed.entry().unwrap().payload["title"],
      json!("Title 1")
    );
  }

  #[tokio::test]
  async fn test_repeated_item_within_run_is_skipped() {
    let cache = memory_cache();
    let client = ScriptedCatalog::with_ids(&["1", "2", "2", "3"], 2);

    let run = sync(&cache, &client, 4).await;

    assert_eq!(run.processed, 4);
    assert_eq!(run.skipped_duplicate, 1);
    assert_eq!(run.succeeded, 3);
  }

  #[tokio::test]
  async fn test_item_failures_are_counted_and_skipped() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(6, 3)
      .fail_detail("2", UpstreamError::Server(502, "bad gateway".into()))
      .fail_detail("5", UpstreamError::NotFound("5".into()));

    let run = sync(&cache, &client, 6).await;

    assert_eq!(run.processed, 6);
    assert_eq!(run.failed, 2);
    assert_eq!(run.succeeded, 4);
    assert_eq!(run.outcome, SyncOutcome::Completed);
    assert!(cache.get("2", Default::default()).unwrap().is_miss());
    assert!(!cache.get("6", Default::default()).unwrap().is_miss());
  }

  #[tokio::test]
  async fn test_normalization_failure_counts_as_failed() {
    let cache = memory_cache();
    let mut untitled = full("2");
    untitled.title = String::new();
    let client =
      ScriptedCatalog::popular(3, 3).set_page(1, vec![full("1"), untitled, summary("3")]);

    let run = sync(&cache, &client, 3).await;

    assert_eq!(run.failed, 1);
    assert_eq!(run.succeeded, 2);
    // Only the summary item needed a detail fetch
    assert_eq!(client.detail_calls(), vec!["3".to_string()]);
  }

  #[tokio::test]
  async fn test_unauthorized_item_aborts_after_flushing_page() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(8, 4)
      .fail_detail("3", UpstreamError::Unauthorized("expired token".into()));

    let run = sync(&cache, &client, 8).await;

    assert!(matches!(
      run.outcome,
      SyncOutcome::Aborted {
        reason: AbortReason::Unauthorized { .. }
      }
    ));
    assert_eq!(client.page_calls(), vec![1]);
    assert_eq!(run.succeeded, 2);
    assert_eq!(cache.stats().unwrap().total_entries, 2);
  }

  #[tokio::test]
  async fn test_page_error_aborts() {
    let cache = memory_cache();
    let client =
      ScriptedCatalog::popular(8, 4).fail_page(2, UpstreamError::Network("reset".into()), 1);

    let run = sync(&cache, &client, 8).await;

    assert_eq!(client.page_calls(), vec![1, 2]);
    assert!(matches!(
      run.outcome,
      SyncOutcome::Aborted {
        reason: AbortReason::Upstream { page: 2, .. }
      }
    ));
    assert_eq!(run.succeeded, 4);
  }

  #[tokio::test]
  async fn test_exhausted_upstream_stops_early() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(6, 4);

    let run = sync(&cache, &client, 20).await;

    assert_eq!(client.page_calls(), vec![1, 2]);
    assert_eq!(run.processed, 6);
    assert_eq!(run.outcome, SyncOutcome::Exhausted);
  }

  #[tokio::test]
  async fn test_cancelled_before_first_page() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(8, 4);
    let cancel = CancelToken::new();
    cancel.cancel();

    let run = SyncCoordinator::new(&cache, &client, BACKOFF)
      .run(8, &cancel)
      .await
      .unwrap();

    assert!(client.page_calls().is_empty());
    assert_eq!(run.outcome, SyncOutcome::Cancelled);
    assert_eq!(run.processed, 0);
  }

  #[tokio::test]
  async fn test_cancel_mid_run_finishes_current_page() {
    let cache = memory_cache();
    let cancel = CancelToken::new();
    let client = ScriptedCatalog::popular(12, 4).cancel_during_page(1, &cancel);

    let run = SyncCoordinator::new(&cache, &client, BACKOFF)
      .run(12, &cancel)
      .await
      .unwrap();

    assert_eq!(client.page_calls(), vec![1]);
    assert_eq!(run.pages_fetched, 1);
    assert_eq!(run.processed, 4);
    assert_eq!(run.succeeded, 4);
    assert_eq!(run.outcome, SyncOutcome::Cancelled);
    assert_eq!(cache.stats().unwrap().total_entries, 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_rate_limited_item_fails_and_run_continues() {
    let cache = memory_cache();
    let limited = UpstreamError::RateLimited {
      retry_after: Some(Duration::from_secs(3)),
    };
    let client = ScriptedCatalog::popular(4, 4).fail_detail("2", limited);

    let started = tokio::time::Instant::now();
    let run = sync(&cache, &client, 4).await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(run.failed, 1);
    assert_eq!(run.succeeded, 3);
    assert_eq!(run.outcome, SyncOutcome::Completed);
    assert!(cache.get("2", Default::default()).unwrap().is_miss());
    assert!(!cache.get("3", Default::default()).unwrap().is_miss());
  }

  #[tokio::test]
  async fn test_huge_request_is_bounded_by_upstream() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(6, 4);

    let run = sync(&cache, &client, usize::MAX).await;

    assert_eq!(client.page_calls(), vec![1, 2]);
    assert_eq!(run.processed, 6);
    assert_eq!(run.outcome, SyncOutcome::Exhausted);
  }

  #[tokio::test]
  async fn test_zero_requested_fetches_nothing() {
    let cache = memory_cache();
    let client = ScriptedCatalog::popular(8, 4);

    let run = sync(&cache, &client, 0).await;

    assert!(client.page_calls().is_empty());
    assert_eq!(run.outcome, SyncOutcome::Completed);
  }

  #[tokio::test]
  async fn test_sync_into_sqlite_backend() {
    let cache = CatalogCache::new(
      SqliteBackend::open_in_memory().unwrap(),
      ChronoDuration::hours(1),
    );
    let client = ScriptedCatalog::popular(10, 4);

    let run = sync(&cache, &client, 10).await;
    let again = sync(&cache, &client, 10).await;

    assert_eq!(run.succeeded, 10);
    assert_eq!(again.skipped_duplicate, 10);
    assert_eq!(again.succeeded, 0);
    let stats = cache.stats().unwrap();
    assert_eq!(stats.total_entries, 10);
    assert_eq!(stats.valid_entries, 10);
    assert_eq!(stats.max_size, None);
  }
}
