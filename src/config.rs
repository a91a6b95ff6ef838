use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::upstream::MediaType;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub upstream: UpstreamConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// Bounded in-process map, lost on restart
  #[default]
  Memory,
  /// SQLite file, survives restarts
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub backend: BackendKind,
  /// Lifetime of every entry in seconds
  pub ttl_secs: u64,
  /// Capacity bound (memory backend only)
  pub max_size: usize,
  /// Database file (sqlite backend only, defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: BackendKind::Memory,
      ttl_secs: 24 * 60 * 60,
      max_size: 10_000,
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.ttl_secs as i64)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
  pub base_url: String,
  /// Which listing and detail endpoints to use
  pub media_type: MediaType,
  /// Items per listing page as served by the API
  pub page_size: usize,
  pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.themoviedb.org/3".to_string(),
      media_type: MediaType::Movie,
      page_size: 20,
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Items to sync when no count is given
  pub default_count: usize,
  /// Backoff when a rate-limit response carries no Retry-After
  pub default_backoff_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      default_count: 100,
      default_backoff_secs: 10,
    }
  }
}

impl SyncConfig {
  pub fn default_backoff(&self) -> Duration {
    Duration::from_secs(self.default_backoff_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./reelcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/reelcache/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("reelcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("reelcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Reject values that would break cache invariants.
  pub fn validate(&self) -> Result<()> {
    if self.cache.ttl_secs == 0 {
      return Err(eyre!("cache.ttl_secs must be greater than zero"));
    }
    if self.cache.max_size == 0 {
      return Err(eyre!("cache.max_size must be greater than zero"));
    }
    if self.upstream.page_size == 0 {
      return Err(eyre!("upstream.page_size must be greater than zero"));
    }
    Ok(())
  }

  /// Get the catalog API token from environment variables.
  ///
  /// Checks REELCACHE_API_TOKEN first, then TMDB_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("REELCACHE_API_TOKEN")
      .or_else(|_| std::env::var("TMDB_API_TOKEN"))
      .map_err(|_| {
        eyre!("Catalog API token not found. Set REELCACHE_API_TOKEN or TMDB_API_TOKEN.")
      })
  }
}
