//! Configuration file parser for ~/.config/feedmix/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::DEFAULT_FETCH_TIMEOUT;
use crate::mixer::{DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_TITLE};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Title of every mixed feed.
    pub title: String,

    /// SQLite cache file. Unset = `fmcache.db` next to the config file.
    pub cache_path: Option<PathBuf>,

    /// How long a cached feed is served without refetching.
    pub cache_ttl_secs: u64,

    /// Per-feed fetch timeout. 0 falls back to the default.
    pub fetch_timeout_secs: u64,

    /// Fetches in flight per mix request.
    pub max_concurrent_fetches: usize,

    /// Overall budget for one mix request. 0 = no deadline.
    pub request_deadline_secs: u64,

    /// Age past which `feedmix prune` deletes cache records.
    pub prune_older_than_secs: u64,

    /// Listen address for `feedmix serve`.
    pub bind: String,

    /// User-Agent sent with every fetch.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            cache_path: None,
            cache_ttl_secs: 300,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_deadline_secs: 0,
            prune_older_than_secs: 86_400,
            bind: "127.0.0.1:8080".to_string(),
            user_agent: format!("feedmix/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "title",
        "cache_path",
        "cache_ttl_secs",
        "fetch_timeout_secs",
        "max_concurrent_fetches",
        "request_deadline_secs",
        "prune_older_than_secs",
        "bind",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            ttl_secs = config.cache_ttl_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        match self.fetch_timeout_secs {
            0 => DEFAULT_FETCH_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        match self.request_deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn prune_older_than(&self) -> Duration {
        Duration::from_secs(self.prune_older_than_secs)
    }

    /// Cache file location, resolving the default against `config_dir`.
    pub fn cache_path_in(&self, config_dir: &Path) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| config_dir.join("fmcache.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================
