//! Configuration management for Ruleward

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Prefix for environment overrides, e.g. `RULEWARD__DETECTION__MAX_SIGNALS=50`
pub const ENV_PREFIX: &str = "RULEWARD";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detection rule execution settings
    pub detection: DetectionConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// When `path` is `None` the platform config directory is consulted
    /// (`ruleward.toml`), and a missing file there is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration file");
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that would make rule execution meaningless
    pub fn validate(&self) -> Result<()> {
        if self.detection.max_signals == 0 {
            return Err(Error::config("detection.max_signals must be greater than 0"));
        }
        if self.detection.search_after_size == 0 {
            return Err(Error::config(
                "detection.search_after_size must be greater than 0",
            ));
        }
        if self.detection.signals_index.trim().is_empty() {
            return Err(Error::config("detection.signals_index must not be empty"));
        }
        self.scheduler.validate()
    }
}

/// Default location of `ruleward.toml` for the current user
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ruleward", "ruleward")
        .map(|dirs| dirs.config_dir().join("ruleward.toml"))
}

/// Detection rule execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Upper bound on signals any single tuple may create
    pub max_signals: u32,
    /// Maximum number of catch-up intervals scheduled to cover a gap
    pub max_rule_gap_ratio: u32,
    /// Page size used by search-after queries
    pub search_after_size: u32,
    /// Index alerts are written to
    pub signals_index: String,
    /// Space the rules run in
    pub space_id: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_signals: 100,
            max_rule_gap_ratio: 4,
            search_after_size: 100,
            signals_index: ".alerts-security.alerts-default".to_string(),
            space_id: "default".to_string(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the scheduler checks for due rules
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Rules executed concurrently within one tick
    pub max_concurrent_rules: usize,
}

impl SchedulerConfig {
    /// Check that the scheduler can tick and run at least one rule
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::config("scheduler.tick_interval must not be zero"));
        }
        if self.max_concurrent_rules == 0 {
            return Err(Error::config(
                "scheduler.max_concurrent_rules must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            max_concurrent_rules: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
