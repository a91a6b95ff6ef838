use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::api_types::{ApiDetail, ApiPopularResponse};
use super::errors::UpstreamError;
use super::types::{CatalogItem, MediaType, PopularPage};
use super::CatalogClient;
use crate::config::UpstreamConfig;

/// Catalog REST API client
#[derive(Clone)]
pub struct HttpCatalogClient {
  http: reqwest::Client,
  base_url: Url,
  media_type: MediaType,
  page_size: usize,
}

impl HttpCatalogClient {
  pub fn new(config: &UpstreamConfig, token: &str) -> Result<Self> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
      .map_err(|e| eyre!("Invalid API token: {}", e))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("reelcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let base_url = parse_base_url(&config.base_url)?;

    Ok(Self {
      http,
      base_url,
      media_type: config.media_type,
      page_size: config.page_size,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
    join_endpoint(&self.base_url, path)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, UpstreamError> {
    debug!(url = %url, "Catalog request");

    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| UpstreamError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
      let body = response.text().await.unwrap_or_default();
      let err = UpstreamError::from_status(status.as_u16(), &body, retry_after);
      if err.is_rate_limited() {
        warn!(url = %url, retry_after = ?retry_after, "Catalog rate limit hit");
      }
      return Err(err);
    }

    response
      .json::<T>()
      .await
      .map_err(|e| UpstreamError::Decode(e.to_string()))
  }
}

impl CatalogClient for HttpCatalogClient {
  fn page_size(&self) -> usize {
    self.page_size
  }

  async fn fetch_by_id(&self, id: &str) -> Result<CatalogItem, UpstreamError> {
    let url = self.endpoint(&format!(
      "{}/{}",
      self.media_type.as_path(),
      urlencode_segment(id)
    ))?;
    let detail: ApiDetail = self.get_json(url).await.map_err(|e| match e {
      UpstreamError::NotFound(_) => UpstreamError::NotFound(id.to_string()),
      other => other,
    })?;
    Ok(detail.into_full(self.media_type))
  }

  async fn fetch_popular_page(&self, page: u32) -> Result<PopularPage, UpstreamError> {
    let mut url = self.endpoint(&format!("{}/popular", self.media_type.as_path()))?;
    url.query_pairs_mut().append_pair("page", &page.to_string());

    let response: ApiPopularResponse = self.get_json(url).await?;
    Ok(response.into_page(self.media_type))
  }
}

fn parse_base_url(raw: &str) -> Result<Url> {
  // Url::join drops the last path segment unless it ends with '/'
  let mut base = raw.to_string();
  if !base.ends_with('/') {
    base.push('/');
  }
  Url::parse(&base).map_err(|e| eyre!("Invalid catalog base URL {}: {}", raw, e))
}

fn join_endpoint(base: &Url, path: &str) -> Result<Url, UpstreamError> {
  base
    .join(path)
    .map_err(|e| UpstreamError::Network(format!("Bad endpoint {}: {}", path, e)))
}

/// Keep ids from escaping their path segment.
fn urlencode_segment(id: &str) -> String {
  url::form_urlencoded::byte_serialize(id.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_keeps_base_path() {
    for raw in ["https://api.example.org/3", "https://api.example.org/3/"] {
      let base = parse_base_url(raw).unwrap();
      let url = join_endpoint(&base, "movie/popular").unwrap();
      assert_eq!(url.as_str(), "https://api.example.org/3/movie/popular");
    }
  }

  #[test]
  fn test_rejects_bad_base_url() {
    assert!(parse_base_url("not a url").is_err());
  }

  #[test]
  fn test_rejects_bad_token() {
    let config = UpstreamConfig::default();
    assert!(HttpCatalogClient::new(&config, "line\nbreak").is_err());
  }

  #[test]
  fn test_segment_encoding() {
    assert_eq!(urlencode_segment("603"), "603");
    assert_eq!(urlencode_segment("../x"), "..%2Fx");
  }
}
