//! Configuration management for the intel watcher
//!
//! Configuration is read from a TOML file, then environment variables
//! (`INTELWATCHER_*`) and finally command-line flags override individual
//! values. The scheduler and workers receive the resulting [`Config`] by
//! value; nothing reads global state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest chunk the `getEntities` endpoint accepts per request
pub const MAX_TILES_PER_WORKER: usize = 25;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler and worker pool configuration
    pub scraper: ScraperConfig,

    /// Where the areas to scrape come from
    pub areas: AreasConfig,

    /// Intel map session configuration
    pub intel: IntelConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Scheduler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Worker pool width
    pub workers: usize,

    /// Maximum tiles selected per outer iteration
    pub max_tiles: usize,

    /// Tiles per `getEntities` request
    pub tiles_per_worker: usize,

    /// Minutes to sleep between outer iterations
    pub area_sleep: u64,

    /// Rate limit for map requests (requests per second)
    pub requests_per_second: u32,
}

/// Area source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AreasConfig {
    /// Semicolon separated `minLon,minLat,maxLon,maxLat` boxes
    pub bbox: Option<String>,

    /// Koji feature collection URL; replaces `bbox` when set
    pub koji_project: Option<String>,

    /// Bearer token for the Koji API
    pub koji_bearer: Option<String>,

    /// Only keep Koji features whose `properties.type` is listed
    pub koji_include: Vec<String>,
}

/// Intel map session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelConfig {
    /// Raw cookie string copied from a logged in browser session
    pub cookie: String,

    /// Base URL of the intel map
    pub base_url: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Optional proxy URL (http, https or socks5)
    pub proxy: Option<String>,

    /// User agent string
    pub user_agent: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_tiles: 2000,
            tiles_per_worker: 15,
            area_sleep: 1,
            requests_per_second: 10,
        }
    }
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            cookie: String::new(),
            base_url: String::from("https://intel.ingress.com"),
            request_timeout_secs: 30,
            proxy: None,
            user_agent: String::from(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/intel.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `INTELWATCHER_*` environment variable overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.parse::<T>().ok())
        }

        if let Some(workers) = parsed(lookup("INTELWATCHER_WORKERS")) {
            self.scraper.workers = workers;
        }
        if let Some(max_tiles) = parsed(lookup("INTELWATCHER_MAX_TILES")) {
            self.scraper.max_tiles = max_tiles;
        }
        if let Some(tiles) = parsed(lookup("INTELWATCHER_TILES_PER_WORKER")) {
            self.scraper.tiles_per_worker = tiles;
        }
        if let Some(sleep) = parsed(lookup("INTELWATCHER_AREA_SLEEP")) {
            self.scraper.area_sleep = sleep;
        }
        if let Some(cookie) = lookup("INTELWATCHER_COOKIE") {
            self.intel.cookie = cookie;
        }
        if let Some(bbox) = lookup("INTELWATCHER_BBOX") {
            self.areas.bbox = Some(bbox);
        }
        if let Some(path) = lookup("INTELWATCHER_SQLITE_PATH") {
            self.database.sqlite_path = PathBuf::from(path);
        }
        if let Some(level) = lookup("INTELWATCHER_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scraper.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.scraper.max_tiles == 0 {
            anyhow::bail!("max_tiles must be greater than 0");
        }

        if !(1..=MAX_TILES_PER_WORKER).contains(&self.scraper.tiles_per_worker) {
            anyhow::bail!(
                "tiles_per_worker must be between 1 and {MAX_TILES_PER_WORKER}, got {}",
                self.scraper.tiles_per_worker
            );
        }

        if self.scraper.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be greater than 0");
        }

        if self.areas.bbox.is_none() && self.areas.koji_project.is_none() {
            anyhow::bail!("either areas.bbox or areas.koji_project must be set");
        }

        Ok(())
    }

    /// Validate that the map session can be established
    pub fn validate_session(&self) -> Result<()> {
        if self.intel.cookie.trim().is_empty() {
            anyhow::bail!("intel.cookie must not be empty");
        }
        Ok(())
    }

    /// Cooldown between outer iterations
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.scraper.area_sleep * 60)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.intel.request_timeout_secs)
    }
}
