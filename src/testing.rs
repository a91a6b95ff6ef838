//! Scripted catalog client and fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::sync::CancelToken;
use crate::upstream::{
  CatalogClient, CatalogItem, ItemDetail, MediaType, PopularPage, UpstreamError,
};

pub fn epoch() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn summary(id: &str) -> CatalogItem {
  CatalogItem {
    id: id.to_string(),
    title: format!("Title {}", id),
    media_type: MediaType::Movie,
    release_year: Some(2000),
    rating: Some(7.5),
    poster_path: Some(format!("/{}.jpg", id)),
    detail: None,
  }
}

pub fn full(id: &str) -> CatalogItem {
  CatalogItem {
    detail: Some(ItemDetail {
      overview: Some(format!("About {}", id)),
      ..Default::default()
    }),
    ..summary(id)
  }
}

/// Popular listing of `total` items ("1".."total") split into pages.
///
/// Scripted errors are served before the real page, one per call.
pub struct ScriptedCatalog {
  page_size: usize,
  pages: Vec<Vec<CatalogItem>>,
  page_errors: Mutex<HashMap<u32, VecDeque<UpstreamError>>>,
  detail_errors: HashMap<String, UpstreamError>,
  detail_overrides: HashMap<String, CatalogItem>,
  cancel_on_page: Option<(u32, CancelToken)>,
  page_calls: Mutex<Vec<u32>>,
  detail_calls: Mutex<Vec<String>>,
}

impl ScriptedCatalog {
  pub fn popular(total: usize, page_size: usize) -> Self {
    let ids: Vec<String> = (1..=total).map(|i| i.to_string()).collect();
    Self::with_ids(&ids.iter().map(String::as_str).collect::<Vec<_>>(), page_size)
  }

  pub fn with_ids(ids: &[&str], page_size: usize) -> Self {
    let pages = ids
      .chunks(page_size)
      .map(|chunk| chunk.iter().map(|id| summary(id)).collect())
      .collect();
    Self {
      page_size,
      pages,
      page_errors: Mutex::new(HashMap::new()),
      detail_errors: HashMap::new(),
      detail_overrides: HashMap::new(),
      cancel_on_page: None,
      page_calls: Mutex::new(Vec::new()),
      detail_calls: Mutex::new(Vec::new()),
    }
  }

  /// Replace a page's items verbatim.
  pub fn set_page(mut self, page: u32, items: Vec<CatalogItem>) -> Self {
    self.pages[page as usize - 1] = items;
    self
  }

  /// Fail the next `times` calls for `page` with `err`.
  pub fn fail_page(self, page: u32, err: UpstreamError, times: usize) -> Self {
    {
      let mut errors = self.page_errors.lock().unwrap();
      let queue = errors.entry(page).or_default();
      for _ in 0..times {
        queue.push_back(err.clone());
      }
    }
    self
  }

  /// Always fail detail fetches for `id`.
  pub fn fail_detail(mut self, id: &str, err: UpstreamError) -> Self {
    self.detail_errors.insert(id.to_string(), err);
    self
  }

  /// Serve `item` for detail fetches of `id`.
  pub fn set_detail(mut self, id: &str, item: CatalogItem) -> Self {
    self.detail_overrides.insert(id.to_string(), item);
    self
  }

  /// Cancel `token` while `page` is being served.
  pub fn cancel_during_page(mut self, page: u32, token: &CancelToken) -> Self {
    self.cancel_on_page = Some((page, token.clone()));
    self
  }

  pub fn page_calls(&self) -> Vec<u32> {
    self.page_calls.lock().unwrap().clone()
  }

  pub fn detail_calls(&self) -> Vec<String> {
    self.detail_calls.lock().unwrap().clone()
  }
}

impl CatalogClient for ScriptedCatalog {
  fn page_size(&self) -> usize {
    self.page_size
  }

  async fn fetch_by_id(&self, id: &str) -> Result<CatalogItem, UpstreamError> {
    self.detail_calls.lock().unwrap().push(id.to_string());
    if let Some(err) = self.detail_errors.get(id) {
      return Err(err.clone());
    }
    if let Some(item) = self.detail_overrides.get(id) {
      return Ok(item.clone());
    }
    let known = self.pages.iter().flatten().any(|item| item.id == id);
    if known {
      Ok(full(id))
    } else {
      Err(UpstreamError::NotFound(id.to_string()))
    }
  }

  async fn fetch_popular_page(&self, page: u32) -> Result<PopularPage, UpstreamError> {
    self.page_calls.lock().unwrap().push(page);
    if let Some((cancel_page, token)) = &self.cancel_on_page {
      if *cancel_page == page {
        token.cancel();
      }
    }
    let scripted = self
      .page_errors
      .lock()
      .unwrap()
      .get_mut(&page)
      .and_then(|queue| queue.pop_front());
    if let Some(err) = scripted {
      return Err(err);
    }

    let items = self
      .pages
      .get(page as usize - 1)
      .cloned()
      .unwrap_or_default();
    Ok(PopularPage {
      items,
      has_more: (page as usize) < self.pages.len(),
    })
  }
}
