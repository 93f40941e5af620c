//! Configuration loading.
//!
//! Every hwsim document is TOML. [`ConfigLoader`] is implemented for any
//! deserializable type, so `MachineConfig::load(path)` and
//! `MachineConfig::parse(text)` come for free.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration failure.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("Cannot read {}: {message}", path.display())]
    Unreadable {
        /// File that failed.
        path: PathBuf,
        /// OS error text.
        message: String,
    },

    /// TOML syntax or shape error.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Parsed, but the values are inconsistent.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Object and service log level, least severe first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-tick detail.
    Trace,
    /// Object state changes.
    Debug,
    /// Lifecycle.
    #[default]
    Info,
    /// Recoverable faults.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    /// Matching `tracing` level.
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    /// Compact form cached by object loggers.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8); unknown values read as `Error`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

fn default_service_name() -> String {
    crate::consts::DEFAULT_SERVICE_NAME.to_string()
}

/// `[shared]` table: instance name and default log level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Default level for object loggers.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance name, reported in logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Rejects an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// TOML loading for any deserializable configuration type.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;
        Self::parse(&content)
    }

    /// Parse an in-memory document.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize)]
    struct Frontend {
        #[serde(default)]
        shared: SharedConfig,
        duration_ms: u64,
    }

    #[test]
    fn test_levels_order_by_severity() {
        assert_eq!(LogLevel::Debug.min(LogLevel::Warn), LogLevel::Debug);
        assert_eq!(LogLevel::from_u8(LogLevel::Warn.as_u8()), LogLevel::Warn);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Error);
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let path = Path::new("/nonexistent/hwsim/machine.toml");
        match Frontend::load(path) {
            Err(ConfigError::FileNotFound(missing)) => assert_eq!(missing, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "duration_ms = [").unwrap();
        assert!(matches!(
            Frontend::load(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_shared_table_is_optional() {
        let config = Frontend::parse("duration_ms = 250").unwrap();
        assert_eq!(config.duration_ms, 250);
        assert_eq!(config.shared.service_name, "hwsim");
        assert_eq!(config.shared.log_level, LogLevel::Info);

        let config =
            Frontend::parse("duration_ms = 1\n[shared]\nlog_level = \"trace\"").unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Trace);
        assert_eq!(config.shared.service_name, "hwsim");
    }

    #[test]
    fn test_empty_service_name_is_rejected() {
        let shared = SharedConfig {
            service_name: String::new(),
            ..SharedConfig::default()
        };
        assert!(matches!(
            shared.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
