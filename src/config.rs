//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - geosession.toml (default configuration)
//! - geosession.local.toml (git-ignored local overrides)
//! - Environment variables (GEOSESSION_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # geosession.toml
//! [session]
//! idle_timeout_secs = 1800
//! sweep_interval_secs = 60
//!
//! [paths]
//! working_dir = "/var/lib/geosession/work"
//! output_dir = "/var/lib/geosession/output"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! GEOSESSION_SESSION__IDLE_TIMEOUT_SECS=600
//! GEOSESSION_PATHS__WORKING_DIR=/tmp/geosession
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub datasets: DatasetConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout in seconds before a session is reaped (0 = no timeout)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Interval between reaper sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of concurrent sessions (0 = unlimited)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Dataset handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Maximum page size for dataset listing; larger requests are clamped
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Geometric operation timeout in milliseconds (0 = no timeout)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Attempts at auto-generating a fresh label before giving up
    #[serde(default = "default_label_retry_limit")]
    pub label_retry_limit: usize,
}

/// Filesystem roots the service writes under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for per-session working directories
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Root for exported files handed back to clients
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_idle_timeout_secs() -> u64 {
    1800 // 30 minutes
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_max_sessions() -> usize {
    10_000
}
fn default_max_page_size() -> usize {
    50
}
fn default_operation_timeout_ms() -> u64 {
    30_000
}
fn default_label_retry_limit() -> usize {
    100
}
fn default_working_dir() -> PathBuf {
    PathBuf::from("./work")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. geosession.toml (base configuration)
    /// 2. geosession.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (GEOSESSION_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("geosession.toml"))
            .merge(Toml::file("geosession.local.toml"))
            .merge(Env::prefixed("GEOSESSION_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GEOSESSION_").split("__"))
            .extract()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            max_page_size: default_max_page_size(),
            operation_timeout_ms: default_operation_timeout_ms(),
            label_retry_limit: default_label_retry_limit(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            working_dir: default_working_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.idle_timeout_secs, 1800);
        assert_eq!(config.session.sweep_interval_secs, 60);
        assert_eq!(config.session.max_sessions, 10_000);
        assert_eq!(config.datasets.max_page_size, 50);
        assert_eq!(config.paths.working_dir, PathBuf::from("./work"));
        assert_eq!(config.paths.output_dir, PathBuf::from("./output"));
    }

    #[test]
    fn test_default_logging_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[session]"));
        assert!(toml_str.contains("[paths]"));

        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.session.idle_timeout_secs, 1800);
        assert_eq!(back.datasets.operation_timeout_ms, 30_000);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.datasets.label_retry_limit, 100);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let back: Config = toml::from_str("[session]\nidle_timeout_secs = 300\n").unwrap();
        assert_eq!(back.session.idle_timeout_secs, 300);
        // Everything else falls back to defaults
        assert_eq!(back.session.sweep_interval_secs, 60);
        assert_eq!(back.datasets.max_page_size, 50);
    }
}
