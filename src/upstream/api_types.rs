//! Wire types for the catalog REST API.

use serde::Deserialize;

use super::types::{CatalogItem, ItemDetail, MediaType, PopularPage};

#[derive(Debug, Deserialize)]
pub struct ApiPopularResponse {
  pub page: u32,
  #[serde(default)]
  pub results: Vec<ApiListing>,
  pub total_pages: u32,
}

/// Listing row. Movies use `title`/`release_date`, shows use
/// `name`/`first_air_date`.
#[derive(Debug, Deserialize)]
pub struct ApiListing {
  pub id: u64,
  #[serde(alias = "name", default)]
  pub title: String,
  #[serde(alias = "first_air_date")]
  pub release_date: Option<String>,
  pub vote_average: Option<f64>,
  pub poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiGenre {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiDetail {
  #[serde(flatten)]
  pub listing: ApiListing,
  pub overview: Option<String>,
  pub tagline: Option<String>,
  #[serde(default)]
  pub genres: Vec<ApiGenre>,
  pub runtime: Option<u32>,
  #[serde(default)]
  pub episode_run_time: Vec<u32>,
}

impl ApiListing {
  pub fn into_summary(self, media_type: MediaType) -> CatalogItem {
    CatalogItem {
      id: self.id.to_string(),
      title: self.title,
      media_type,
      release_year: self.release_date.as_deref().and_then(parse_year),
      rating: self.vote_average,
      poster_path: self.poster_path,
      detail: None,
    }
  }
}

impl ApiDetail {
  pub fn into_full(self, media_type: MediaType) -> CatalogItem {
    let runtime_minutes = self
      .runtime
      .or_else(|| self.episode_run_time.first().copied());
    let detail = ItemDetail {
      overview: self.overview.filter(|s| !s.is_empty()),
      tagline: self.tagline.filter(|s| !s.is_empty()),
      genres: self.genres.into_iter().map(|g| g.name).collect(),
      runtime_minutes,
    };

    CatalogItem {
      detail: Some(detail),
      ..self.listing.into_summary(media_type)
    }
  }
}

impl ApiPopularResponse {
  pub fn into_page(self, media_type: MediaType) -> PopularPage {
    PopularPage {
      has_more: self.page < self.total_pages,
      items: self
        .results
        .into_iter()
        .map(|r| r.into_summary(media_type))
        .collect(),
    }
  }
}

/// Year from a "YYYY-MM-DD" date. Empty or malformed dates yield `None`.
fn parse_year(date: &str) -> Option<i32> {
  date.get(..4)?.parse().ok()
}
