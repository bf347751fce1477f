//! Configuration for the telemetry collector.

use crate::core::buffer::BufferLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Collection endpoint that receives flush payloads
    pub endpoint: String,

    /// Period of the automatic flush
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,

    /// Non-forced flushes closer together than this are dropped
    #[serde(with = "duration_ms")]
    pub min_flush_interval: Duration,

    /// Minimum spacing between kept mouse samples
    #[serde(with = "duration_ms")]
    pub mouse_sample_interval: Duration,

    /// Period of the time-on-page update
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,

    /// Buffer capacities
    pub limits: BufferLimits,

    /// Storage key holding the session id
    pub session_key: String,

    /// Path for session storage, consent and transparency stats
    pub data_path: PathBuf,

    /// Path for offline payload exports
    pub export_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("page-telemetry");

        Self {
            endpoint: "http://127.0.0.1:8080/api/analytics/collect".to_string(),
            flush_interval: Duration::from_secs(30),
            min_flush_interval: Duration::from_secs(5),
            mouse_sample_interval: Duration::from_millis(120),
            tick_interval: Duration::from_secs(1),
            limits: BufferLimits::default(),
            session_key: "analytics_session_id".to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("page-telemetry")
            .join("config.json")
    }

    /// File holding the persisted consent decision.
    pub fn consent_path(&self) -> PathBuf {
        self.data_path.join("consent.json")
    }

    /// File backing durable session storage.
    pub fn storage_path(&self) -> PathBuf {
        self.data_path.join("storage.json")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
