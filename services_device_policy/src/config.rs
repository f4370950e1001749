//! Service configuration
//!
//! Loaded from a JSON file. Missing fields take their defaults, so an empty
//! object `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyServiceConfig {
    pub version: u32,
    /// Root of the on-disk journal
    pub base_dir: PathBuf,
    /// How long an administrator has to acknowledge its removal
    pub removal_ack_timeout_ms: u64,
    /// Window before expiry in which administrators are told the password
    /// is about to expire
    pub expiration_grace_period_ms: u64,
    pub expiration_alarm_interval_ms: u64,
}

impl PolicyServiceConfig {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_removal_ack_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.removal_ack_timeout_ms = timeout_ms;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.version != Self::CURRENT_VERSION {
            return Err(ConfigError::UnsupportedVersion(config.version));
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

impl Default for PolicyServiceConfig {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            base_dir: PathBuf::from("/var/lib/devicepolicy"),
            removal_ack_timeout_ms: 60_000,
            expiration_grace_period_ms: 5 * DAY_MS,
            expiration_alarm_interval_ms: DAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = PolicyServiceConfig::from_json("{}").unwrap();
        assert_eq!(config, PolicyServiceConfig::default());
        assert_eq!(config.removal_ack_timeout_ms, 60_000);
        assert_eq!(config.expiration_grace_period_ms, 5 * DAY_MS);
    }

    #[test]
    fn test_partial_override() {
        let config =
            PolicyServiceConfig::from_json(r#"{"base_dir": "/tmp/dp", "removal_ack_timeout_ms": 5}"#)
                .unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/tmp/dp"));
        assert_eq!(config.removal_ack_timeout_ms, 5);
        assert_eq!(config.expiration_alarm_interval_ms, DAY_MS);
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            PolicyServiceConfig::from_json(r#"{"version": 999}"#),
            Err(ConfigError::UnsupportedVersion(999))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            PolicyServiceConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"removal_ack_timeout_ms": 10}"#).unwrap();
        assert_eq!(
            PolicyServiceConfig::from_file(&path)
                .unwrap()
                .removal_ack_timeout_ms,
            10
        );
        assert!(matches!(
            PolicyServiceConfig::from_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
