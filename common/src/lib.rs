/*!
common/src/lib.rs

Shared configuration types and helpers for feedpulse.

This file provides:
- Config data structures (deserialized from TOML)
- Per-widget settings with the defaults used when a key is missing
- An async loader that merges a default file with an override file
- A helper to open the SQLite pool backing the snapshot cache
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Refresh interval used when a widget has none configured (seconds)
pub const DEFAULT_REFRESH_SECONDS: u64 = 30;

/// Number of feed entries shown when a widget has none configured
pub const DEFAULT_ENTRY_COUNT: usize = 10;

/// Lifetime of a cached snapshot that is not refreshed (seconds)
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Longest snapshot lifetime accepted from configuration (one year, seconds)
pub const MAX_CACHE_TTL_SECONDS: u64 = 365 * 24 * 3600;

/// Sentinel `feed_url` value selecting `custom_url` instead of a built-in feed
pub const CUSTOM_FEED: &str = "custom";

/// A built-in feed offered in the widget settings form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedChoice {
    pub url: &'static str,
    pub label: &'static str,
}

/// Built-in feeds. The first one is used when nothing is configured.
pub const DEFAULT_FEEDS: &[FeedChoice] = &[
    FeedChoice {
        url: "http://feeds.reuters.com/reuters/USVideoBreakingviews",
        label: "Reuters Breakingviews Video",
    },
    FeedChoice {
        url: "http://rss.cnn.com/rss/edition.rss",
        label: "CNN Top Stories",
    },
    FeedChoice {
        url: "http://rss.cnn.com/rss/cnn_latest.rss",
        label: "CNN Most Recent",
    },
    FeedChoice {
        url: "http://lorem-rss.herokuapp.com/feed?unit=second&interval=30",
        label: "Lorem Ipsum 30 sec",
    },
    FeedChoice {
        url: "http://lorem-rss.herokuapp.com/feed?unit=second&interval=5",
        label: "Lorem Ipsum 5 sec",
    },
    FeedChoice {
        url: "http://lorem-rss.herokuapp.com/feed?unit=second&interval=1",
        label: "Lorem Ipsum 1 sec",
    },
];

/// Snapshot cache configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: Option<String>, // "memory", "sqlite"
    /// Path to the sqlite database file (only used by the sqlite backend)
    pub path: Option<String>,
    pub ttl_seconds: Option<u64>,
}

impl CacheConfig {
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS)
    }
}

/// Feed fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub user_agent: Option<String>,
}

/// Settings of a single widget instance, as edited through the widget's
/// settings form. Every key is optional; accessors apply the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSettings {
    /// One of the `DEFAULT_FEEDS` urls, an arbitrary url, or `"custom"`
    pub feed_url: Option<String>,
    pub custom_url: Option<String>,
    pub refresh_interval: Option<u64>,
    pub entry_count: Option<usize>,
}

impl WidgetSettings {
    /// Resolve the url that should actually be fetched.
    pub fn feed_url(&self) -> String {
        match self.feed_url.as_deref() {
            Some(CUSTOM_FEED) => self.custom_url.clone().unwrap_or_default(),
            Some(url) => url.to_string(),
            // settings never initialized, use the default feed
            None => DEFAULT_FEEDS[0].url.to_string(),
        }
    }

    pub fn refresh_interval(&self) -> u64 {
        self.refresh_interval.unwrap_or(DEFAULT_REFRESH_SECONDS)
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count.unwrap_or(DEFAULT_ENTRY_COUNT)
    }

    /// Check the values a settings form would reject.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval == Some(0) {
            bail!("refresh_interval must be at least 1 second");
        }
        if self.entry_count == Some(0) {
            bail!("entry_count must be at least 1");
        }
        match self.feed_url.as_deref() {
            Some(CUSTOM_FEED) => {
                let custom = self
                    .custom_url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| anyhow::anyhow!("feed_url is \"custom\" but custom_url is empty"))?;
                Url::parse(custom).with_context(|| format!("invalid custom_url: {}", custom))?;
            }
            Some(url) => {
                Url::parse(url).with_context(|| format!("invalid feed_url: {}", url))?;
            }
            None => {}
        }
        Ok(())
    }
}

/// One configured widget instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub id: String,
    /// Registered widget name; the binary falls back to the RSS widget
    pub kind: Option<String>,
    #[serde(default)]
    pub settings: WidgetSettings,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    pub fetch: Option<FetchConfig>,
    #[serde(default)]
    pub widgets: Vec<WidgetConfig>,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Validate every widget instance; ids must be unique and non-empty.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for w in &self.widgets {
            if w.id.trim().is_empty() {
                bail!("widget id must not be empty");
            }
            if !seen.insert(w.id.as_str()) {
                bail!("duplicate widget id: {}", w.id);
            }
            w.settings
                .validate()
                .with_context(|| format!("invalid settings for widget {}", w.id))?;
        }
        match self.cache.ttl_seconds {
            Some(0) => bail!("cache.ttl_seconds must be at least 1"),
            Some(ttl) if ttl > MAX_CACHE_TTL_SECONDS => {
                bail!("cache.ttl_seconds must be at most {}", MAX_CACHE_TTL_SECONDS)
            }
            _ => {}
        }
        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and the database file if missing.
/// The snapshot cache issues one statement per refresh, so the pool stays small.
///
/// Example:
///   let pool = init_db_pool("data/feedpulse.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
