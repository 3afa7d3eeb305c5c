//! Application configuration.
//!
//! Settings come from an optional TOML file, then environment variables
//! override a few of them:
//!
//! | Variable           | Field          |
//! |--------------------|----------------|
//! | `DATABASE_URL`     | `database_url` |
//! | `REUPLOAD_LOG`     | `log_filter`   |
//! | `REUPLOAD_LOG_DIR` | `log_dir`      |
//! | `FFMPEG_PATH`      | `ffmpeg_path`  |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{DestinationCatalog, DestinationConfig, ReuploadSettings};
use crate::history::HistoryPurgeConfig;
use crate::logging::DEFAULT_LOG_FILTER;
use crate::orchestrator::OrchestratorConfig;
use crate::publisher::SimulationConfig;
use crate::{Error, Result};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "reupload.toml";

pub const DEFAULT_DATABASE_URL: &str = "sqlite:reupload.db?mode=rwc";

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Write rolling log files here when set.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// JSON console logs.
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub history: HistoryPurgeConfig,

    /// Settings used when a request does not bring its own.
    #[serde(default)]
    pub defaults: ReuploadSettings,

    #[serde(default = "DestinationConfig::builtin")]
    pub destinations: Vec<DestinationConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            log_filter: default_log_filter(),
            log_dir: None,
            log_json: false,
            ffmpeg_path: default_ffmpeg_path(),
            orchestrator: OrchestratorConfig::default(),
            simulation: SimulationConfig::default(),
            history: HistoryPurgeConfig::default(),
            defaults: ReuploadSettings::default(),
            destinations: DestinationConfig::builtin(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from `reupload.toml` when present, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config file");
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from `lookup`, usually the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(filter) = lookup("REUPLOAD_LOG") {
            self.log_filter = filter;
        }
        if let Some(dir) = lookup("REUPLOAD_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup("FFMPEG_PATH") {
            self.ffmpeg_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::config("database_url must not be empty"));
        }
        if self.orchestrator.max_concurrent_tasks == 0 {
            return Err(Error::config("orchestrator.max_concurrent_tasks must be at least 1"));
        }
        if self.orchestrator.task_lease_secs == 0 {
            return Err(Error::config("orchestrator.task_lease_secs must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.simulation.failure_rate) {
            return Err(Error::config(format!(
                "simulation.failure_rate must be within [0, 1], got {}",
                self.simulation.failure_rate
            )));
        }
        if self.destinations.is_empty() {
            return Err(Error::config("at least one destination must be configured"));
        }
        for destination in &self.destinations {
            if destination.supported_formats.is_empty() {
                return Err(Error::config(format!(
                    "destination '{}' accepts no formats",
                    destination.id
                )));
            }
            if destination.max_size_bytes == 0 {
                return Err(Error::config(format!(
                    "destination '{}' has a zero size limit",
                    destination.id
                )));
            }
        }
        self.catalog()?;
        self.defaults
            .validate()
            .map_err(|e| Error::config(format!("invalid default settings: {e}")))
    }

    /// Destination catalog built from `destinations`.
    pub fn catalog(&self) -> Result<DestinationCatalog> {
        DestinationCatalog::new(self.destinations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.catalog().unwrap().ids(), vec!["tiktok", "youtube", "instagram"]);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let raw = r#"
            database_url = "sqlite::memory:"
            log_json = true

            [orchestrator]
            max_concurrent_tasks = 2

            [simulation]
            latency_ms = 0
            failure_rate = 0.25

            [defaults]
            watermark = true
            watermark_text = "@me"

            [[destinations]]
            id = "vimeo"
            name = "Vimeo"
            max_size_bytes = 1000
            supported_formats = ["mp4"]
            rate_limit = { daily = 5, hourly = 1 }
        "#;
        let config = AppConfig::from_toml_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.orchestrator.max_concurrent_tasks, 2);
        assert_eq!(config.orchestrator.publish_timeout_secs, 300);
        assert_eq!(config.orchestrator.task_lease_secs, 60);
        assert_eq!(config.simulation.failure_rate, 0.25);
        assert!(config.defaults.watermark);
        assert_eq!(config.destinations.len(), 1);
        assert_eq!(config.destinations[0].rate_limit.unwrap().hourly, 1);
        assert_eq!(config.history.retention_days, 90);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite:other.db"),
            ("REUPLOAD_LOG", "reupload=debug"),
            ("FFMPEG_PATH", "/opt/ffmpeg"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_url, "sqlite:other.db");
        assert_eq!(config.log_filter, "reupload=debug");
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg");
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.orchestrator.max_concurrent_tasks = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = AppConfig::default();
        config.orchestrator.task_lease_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = AppConfig::default();
        config.simulation.failure_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.destinations.push(DestinationConfig::tiktok());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.defaults = ReuploadSettings::default().with_resize("wide");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/reupload.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reupload.toml");
        std::fs::write(&path, "ffmpeg_path = \"/usr/local/bin/ffmpeg\"\n").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.ffmpeg_path, "/usr/local/bin/ffmpeg");
    }
}
