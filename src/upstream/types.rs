use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of catalog title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
  #[default]
  Movie,
  Tv,
}

impl MediaType {
  /// Path segment used by the catalog API
  pub fn as_path(&self) -> &'static str {
    match self {
      MediaType::Movie => "movie",
      MediaType::Tv => "tv",
    }
  }
}

/// Catalog item as the cache sees it.
///
/// Listing endpoints return summaries (`detail == None`); the detail
/// endpoint fills `detail` in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
  pub id: String,
  pub title: String,
  pub media_type: MediaType,
  pub release_year: Option<i32>,
  pub rating: Option<f64>,
  pub poster_path: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<ItemDetail>,
}

/// Fields only the detail endpoint returns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
  pub overview: Option<String>,
  pub tagline: Option<String>,
  #[serde(default)]
  pub genres: Vec<String>,
  pub runtime_minutes: Option<u32>,
}

/// One page of the popular listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopularPage {
  pub items: Vec<CatalogItem>,
  pub has_more: bool,
}

/// Why an item could not be turned into a cache payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
  #[error("item has no id")]
  MissingId,
  #[error("item {0} has no title")]
  MissingTitle(String),
  #[error("item {0} could not be serialized: {1}")]
  Serialize(String, String),
}

impl CatalogItem {
  pub fn is_summary(&self) -> bool {
    self.detail.is_none()
  }

  /// Normalize into the JSON document stored in the cache.
  pub fn to_payload(&self) -> Result<Value, NormalizeError> {
    let id = self.id.trim();
    if id.is_empty() {
      return Err(NormalizeError::MissingId);
    }
    if self.title.trim().is_empty() {
      return Err(NormalizeError::MissingTitle(id.to_string()));
    }

    let mut item = self.clone();
    item.id = id.to_string();
    item.title = self.title.trim().to_string();
    serde_json::to_value(&item)
      .map_err(|e| NormalizeError::Serialize(item.id.clone(), e.to_string()))
  }
}
