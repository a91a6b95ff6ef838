//! Upstream catalog: the rate-limited metadata API the cache fronts.

mod api_types;
mod client;
mod errors;
mod types;

use std::future::Future;

pub use client::HttpCatalogClient;
pub use errors::UpstreamError;
pub use types::{CatalogItem, ItemDetail, MediaType, NormalizeError, PopularPage};

/// What the cache needs from the catalog API.
pub trait CatalogClient: Send + Sync {
  /// Number of items per popular-listing page.
  fn page_size(&self) -> usize;

  /// Full detail for one item.
  fn fetch_by_id(
    &self,
    id: &str,
  ) -> impl Future<Output = Result<CatalogItem, UpstreamError>> + Send;

  /// One page (1-based) of the popular listing. Items may be summaries.
  fn fetch_popular_page(
    &self,
    page: u32,
  ) -> impl Future<Output = Result<PopularPage, UpstreamError>> + Send;
}
