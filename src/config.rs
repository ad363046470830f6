//! Configuration file parser for ~/.config/feedfan/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ingest::{RefreshOptions, Schedule, DEFAULT_FAN_OUT_CHUNK};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` means `<config dir>/feedfan.db`.
    pub database_path: Option<PathBuf>,

    /// Maximum feeds processed at once.
    pub concurrency: usize,

    /// `"pooled"` or `"windowed"`.
    pub schedule: Schedule,

    /// Feeds per run when no explicit subset is requested.
    pub feeds_per_run: usize,

    pub fetch_timeout_secs: u64,

    pub max_feed_bytes: usize,

    /// Rows per user entry state INSERT.
    pub fan_out_chunk_size: usize,

    /// Feeds fetched more recently than this are skipped. 0 = never skip.
    pub min_refresh_interval_minutes: u64,

    /// Consecutive failures before a feed is skipped. 0 = never skip.
    pub failure_threshold: u32,

    /// Period of the daemon loop.
    pub refresh_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            concurrency: 10,
            schedule: Schedule::Pooled,
            feeds_per_run: 50,
            fetch_timeout_secs: 30,
            max_feed_bytes: crate::feed::MAX_FEED_SIZE,
            fan_out_chunk_size: DEFAULT_FAN_OUT_CHUNK,
            min_refresh_interval_minutes: 0,
            failure_threshold: 5,
            refresh_interval_minutes: 30,
        }
    }
}

const KNOWN_KEYS: [&str; 10] = [
    "database_path",
    "concurrency",
    "schedule",
    "feeds_per_run",
    "fetch_timeout_secs",
    "max_feed_bytes",
    "fan_out_chunk_size",
    "min_refresh_interval_minutes",
    "failure_threshold",
    "refresh_interval_minutes",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero for a count or timeout → clamped to 1
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config = toml::from_str::<Config>(&content)?.clamped();
        tracing::info!(
            path = %path.display(),
            concurrency = config.concurrency,
            schedule = ?config.schedule,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Replace zero counts and timeouts with 1.
    fn clamped(mut self) -> Self {
        for (key, value) in [
            ("concurrency", &mut self.concurrency),
            ("feeds_per_run", &mut self.feeds_per_run),
            ("fan_out_chunk_size", &mut self.fan_out_chunk_size),
        ] {
            if *value == 0 {
                tracing::warn!(key, "Config value 0 is not allowed, using 1");
                *value = 1;
            }
        }
        if self.fetch_timeout_secs == 0 {
            tracing::warn!(key = "fetch_timeout_secs", "Config value 0 is not allowed, using 1");
            self.fetch_timeout_secs = 1;
        }
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Daemon period. `None` when the interval is 0.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_minutes > 0)
            .then(|| Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60)))
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            concurrency: self.concurrency.max(1),
            schedule: self.schedule,
            feeds_per_run: self.feeds_per_run.max(1),
            fan_out_chunk_size: self.fan_out_chunk_size.max(1),
            min_refresh_interval: (self.min_refresh_interval_minutes > 0)
                .then(|| Duration::from_secs(self.min_refresh_interval_minutes.saturating_mul(60))),
            failure_threshold: (self.failure_threshold > 0).then_some(self.failure_threshold),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
