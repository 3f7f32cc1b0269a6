//! Typed configuration from environment variables and an optional TOML
//! tuning file.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The access token is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub access_token: SecretString,
    pub cache_path: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub tuning: Tuning,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let tuning = match std::env::var("KENNEL_CONFIG") {
            Ok(path) => Tuning::load(Path::new(&path))?,
            Err(_) => Tuning::default(),
        };

        Ok(Self {
            access_token: SecretString::from(required_var("GOOGLE_ACCESS_TOKEN")?),
            cache_path: std::env::var("KENNEL_CACHE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_path()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tuning,
        })
    }
}

/// Knobs read from the TOML file named by `KENNEL_CONFIG`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
}

impl Tuning {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read tuning file {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad tuning file {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub status_ttl_secs: u64,
    pub status_capacity: usize,
    pub disk_ttl_days: i64,
    pub return_code_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: 5,
            status_capacity: 256,
            disk_ttl_days: 30,
            return_code_ttl_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn return_code_ttl(&self) -> Duration {
        Duration::from_secs(self.return_code_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub timeout_secs: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub line_poll_ms: u64,
    /// Most log lines a single update reads before yielding.
    pub max_update_lines: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 3,
            backoff_ms: 500,
            line_poll_ms: 100,
            max_update_lines: 5000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn line_poll(&self) -> Duration {
        Duration::from_millis(self.line_poll_ms)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn default_cache_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".cache")
        .join("kennel")
        .join("cache.db")
}
