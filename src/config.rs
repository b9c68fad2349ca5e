//! Sync Configuration
//!
//! Table names, list capacities, filtering policy and logging settings.
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Event;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Table names the feeds subscribe to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablesConfig {
    /// Anomaly rows (default: "anomalies")
    #[serde(default = "default_anomalies_table")]
    pub anomalies: String,

    /// Baseline aggregate rows; changes trigger a dashboard resnapshot
    /// (default: "baseline_stats")
    #[serde(default = "default_baseline_table")]
    pub baseline: String,

    /// Notification rows (default: "notifications")
    #[serde(default = "default_notifications_table")]
    pub notifications: String,

    /// Activity log rows (default: "activity_log")
    #[serde(default = "default_activity_table")]
    pub activity: String,
}

fn default_anomalies_table() -> String {
    "anomalies".to_string()
}

fn default_baseline_table() -> String {
    "baseline_stats".to_string()
}

fn default_notifications_table() -> String {
    "notifications".to_string()
}

fn default_activity_table() -> String {
    "activity_log".to_string()
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            anomalies: default_anomalies_table(),
            baseline: default_baseline_table(),
            notifications: default_notifications_table(),
            activity: default_activity_table(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub tables: TablesConfig,

    /// Column holding the owning subject's id (default: "user_id")
    #[serde(default = "default_subject_column")]
    pub subject_column: String,

    /// Capacity of the dashboard's recent-anomalies list (default: 10)
    #[serde(default = "default_recent_capacity")]
    pub recent_anomalies_capacity: usize,

    /// Capacity of the activity feed (default: 50)
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,

    /// Skip local predicate checks and rely on the transport's filtering
    /// (default: false)
    #[serde(default)]
    pub trust_server_filtering: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_subject_column() -> String {
    "user_id".to_string()
}

fn default_recent_capacity() -> usize {
    10
}

fn default_activity_capacity() -> usize {
    50
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tables: TablesConfig::default(),
            subject_column: default_subject_column(),
            recent_anomalies_capacity: default_recent_capacity(),
            activity_capacity: default_activity_capacity(),
            trust_server_filtering: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::info!(
            event = Event::ConfigLoaded.as_str(),
            path = %path.display(),
            "loaded sync configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.recent_anomalies_capacity == 0 {
            return Err(ConfigError::Invalid(
                "recent_anomalies_capacity must be greater than zero".into(),
            ));
        }
        if self.activity_capacity == 0 {
            return Err(ConfigError::Invalid(
                "activity_capacity must be greater than zero".into(),
            ));
        }
        if self.subject_column.trim().is_empty() {
            return Err(ConfigError::Invalid("subject_column must not be empty".into()));
        }

        let tables = [
            ("anomalies", &self.tables.anomalies),
            ("baseline", &self.tables.baseline),
            ("notifications", &self.tables.notifications),
            ("activity", &self.tables.activity),
        ];
        for (name, table) in tables {
            if table.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("tables.{name} must not be empty")));
            }
        }
        Ok(())
    }
}
