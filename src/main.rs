use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::info;

use reelcache::cache::{CatalogCache, Lookup, ReadMode};
use reelcache::config::Config;
use reelcache::sync::CancelToken;
use reelcache::upstream::HttpCatalogClient;

#[derive(Parser, Debug)]
#[command(name = "reelcache")]
#[command(about = "Metadata cache for a rate-limited movie/show catalog API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/reelcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Look up a cached entry
  Get {
    key: String,
    /// Treat expired entries as missing
    #[arg(long)]
    fresh_only: bool,
  },
  /// Look up an entry, fetching from the catalog on miss or expiry
  Fetch { id: String },
  /// Store a JSON payload under a key
  Put { key: String, payload: String },
  /// Remove a cached entry
  Invalidate { key: String },
  /// Pre-populate the cache from the popular listing
  Sync {
    /// Number of items to sync (default from config)
    #[arg(short = 'n', long)]
    count: Option<usize>,
  },
  /// Show cache health
  Stats {
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },
  /// Remove expired entries
  Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = reelcache::logging::init()?;
  let config = Config::load(args.config.as_deref())?;
  let cache = CatalogCache::from_config(&config)?;

  match args.command {
    Command::Get { key, fresh_only } => {
      let mode = if fresh_only {
        ReadMode::FreshOnly
      } else {
        ReadMode::AllowStale
      };
      print_lookup(&key, cache.get(&key, mode)?)?;
    }
    Command::Fetch { id } => {
      let client = HttpCatalogClient::new(&config.upstream, &Config::get_api_token()?)?;
      let lookup = cache
        .fetch_through(&id, &client)
        .await
        .map_err(|e| eyre!("Lookup of {} failed: {}", id, e))?;
      print_lookup(&id, lookup)?;
    }
    Command::Put { key, payload } => {
      let payload =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      cache.put(&key, payload)?;
      info!(key = %key, "Stored entry");
    }
    Command::Invalidate { key } => {
      cache.invalidate(&key)?;
    }
    Command::Sync { count } => {
      let client = HttpCatalogClient::new(&config.upstream, &Config::get_api_token()?)?;
      let requested = count.unwrap_or(config.sync.default_count);

      let cancel = CancelToken::new();
      let on_interrupt = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          eprintln!("Interrupted, stopping after the current page...");
          on_interrupt.cancel();
        }
      });

      let run = cache.trigger_sync(&client, requested, &cancel).await?;
      println!("{}", run);
      println!("{}", cache.stats()?);
    }
    Command::Stats { json } => {
      let stats = cache.stats()?;
      if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
      } else {
        println!("backend:   {}", cache.backend_name());
        println!("{}", stats);
      }
    }
    Command::Purge => {
      let removed = cache.purge_expired()?;
      println!("removed {} expired entries", removed);
    }
  }

  Ok(())
}

fn print_lookup(key: &str, lookup: Lookup) -> Result<()> {
  match lookup {
    Lookup::Hit { entry, freshness } => {
      let body = serde_json::json!({
        "freshness": freshness,
        "entry": entry,
      });
      println!("{}", serde_json::to_string_pretty(&body)?);
      Ok(())
    }
    Lookup::Miss => Err(eyre!("{}: not cached", key)),
  }
}
