//! Upstream catalog error types.
//!
//! Maps HTTP status codes to variants the cache and sync coordinator can act
//! on: misses, backoff, abort, or skip.

use std::time::Duration;

/// Catalog API error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Rate limited")]
  RateLimited {
    /// Server-requested wait, when the response carried one
    retry_after: Option<Duration>,
  },

  #[error("Unauthorized: {0}")]
  Unauthorized(String),

  #[error("Network error: {0}")]
  Network(String),

  #[error("Server error ({0}): {1}")]
  Server(u16, String),

  #[error("Malformed response: {0}")]
  Decode(String),
}

impl UpstreamError {
  /// Create an error from an HTTP status code, response body and
  /// `Retry-After` value.
  pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
    match status {
      401 | 403 => UpstreamError::Unauthorized(body.to_string()),
      404 => UpstreamError::NotFound(body.to_string()),
      429 => UpstreamError::RateLimited { retry_after },
      500..=599 => UpstreamError::Server(status, body.to_string()),
      _ => UpstreamError::Network(format!("HTTP {}: {}", status, body)),
    }
  }

  /// Errors that make every further request pointless.
  pub fn is_fatal(&self) -> bool {
    matches!(self, UpstreamError::Unauthorized(_))
  }

  pub fn is_rate_limited(&self) -> bool {
    matches!(self, UpstreamError::RateLimited { .. })
  }

  /// Requested backoff, if this is a rate-limit signal that carried one.
  pub fn retry_after(&self) -> Option<Duration> {
    match self {
      UpstreamError::RateLimited { retry_after } => *retry_after,
      _ => None,
    }
  }
}
