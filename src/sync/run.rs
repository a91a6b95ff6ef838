//! Sync run bookkeeping: the report, how it ended, and the run guards.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Errors that prevent a sync run from producing a report.
///
/// Upstream trouble never lands here; it ends the run early with a partial
/// [`SyncRun`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("sync already running")]
  AlreadyRunning,

  #[error("cache backend failed during sync: {0}")]
  Backend(color_eyre::Report),
}

impl From<color_eyre::Report> for SyncError {
  fn from(err: color_eyre::Report) -> Self {
    SyncError::Backend(err)
  }
}

/// Why a run stopped before reaching its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
  /// The same page was rate limited twice
  RateLimited { page: u32 },
  /// Credentials rejected; nothing further can succeed
  Unauthorized { message: String },
  /// A listing page could not be fetched
  Upstream { page: u32, message: String },
}

impl fmt::Display for AbortReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AbortReason::RateLimited { page } => write!(f, "rate limited twice on page {}", page),
      AbortReason::Unauthorized { message } => write!(f, "unauthorized: {}", message),
      AbortReason::Upstream { page, message } => write!(f, "page {} failed: {}", page, message),
    }
  }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
  /// Processed the requested number of items
  Completed,
  /// Upstream ran out of pages first
  Exhausted,
  /// Stopped at a page boundary on request
  Cancelled,
  Aborted { reason: AbortReason },
}

/// Progress and result of one sync invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
  pub requested: usize,
  /// Items looked at, whatever happened to them
  pub processed: usize,
  /// Items written to the cache
  pub succeeded: usize,
  pub failed: usize,
  /// Items already cached and fresh, or repeated within this run
  pub skipped_duplicate: usize,
  pub pages_fetched: u32,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  pub outcome: SyncOutcome,
}

impl SyncRun {
  pub(crate) fn start(requested: usize, now: DateTime<Utc>) -> Self {
    Self {
      requested,
      processed: 0,
      succeeded: 0,
      failed: 0,
      skipped_duplicate: 0,
      pages_fetched: 0,
      started_at: now,
      finished_at: None,
      outcome: SyncOutcome::Completed,
    }
  }

  pub(crate) fn finish(mut self, outcome: SyncOutcome, now: DateTime<Utc>) -> Self {
    self.outcome = outcome;
    self.finished_at = Some(now);
    self
  }

  /// Wall time between start and finish (zero while unfinished).
  pub fn elapsed(&self) -> chrono::Duration {
    self
      .finished_at
      .map(|end| end - self.started_at)
      .unwrap_or_else(chrono::Duration::zero)
  }

  pub fn is_aborted(&self) -> bool {
    matches!(self.outcome, SyncOutcome::Aborted { .. })
  }
}

impl fmt::Display for SyncRun {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let outcome = match &self.outcome {
      SyncOutcome::Completed => "completed".to_string(),
      SyncOutcome::Exhausted => "upstream exhausted".to_string(),
      SyncOutcome::Cancelled => "cancelled".to_string(),
      SyncOutcome::Aborted { reason } => format!("aborted ({})", reason),
    };
    write!(
      f,
      "sync {}: {}/{} processed, {} stored, {} failed, {} skipped, {} pages in {}ms",
      outcome,
      self.processed,
      self.requested,
      self.succeeded,
      self.failed,
      self.skipped_duplicate,
      self.pages_fetched,
      self.elapsed().num_milliseconds()
    )
  }
}

/// Cooperative cancellation flag, checked at page boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

/// Holds the single-run flag for as long as a sync is in flight.
pub(crate) struct RunGuard<'a> {
  flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
  pub(crate) fn acquire(flag: &'a AtomicBool) -> Result<Self, SyncError> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .map_err(|_| SyncError::AlreadyRunning)?;
    Ok(Self { flag })
  }
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::Release);
  }
}
