//! Configuration management for the WebAdmin files tool.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webadmin/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use files::{AccessControl, Location};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("location #{0} has an empty path")]
    EmptyLocationPath(usize),

    #[error("location '{path}' lists claim '{claim}' more than once")]
    DuplicateClaim { path: String, claim: String },
}

/// Valid log levels for configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub daemon: DaemonConfig,

    /// File access policy.
    pub files: FilesConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// File access policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FilesConfig {
    /// Locations in priority order. The first matching prefix decides.
    pub locations: Vec<Location>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl FilesConfig {
    /// Build the access control for the configured locations.
    pub fn access_control(&self) -> AccessControl {
        AccessControl::new(self.locations.iter().cloned())
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webadmin")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - WEBADMIN_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("WEBADMIN_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        for (index, location) in self.files.locations.iter().enumerate() {
            if location.path.trim().is_empty() {
                return Err(ConfigError::EmptyLocationPath(index));
            }

            let mut seen = HashSet::new();
            for claim in &location.claims {
                if !seen.insert(claim) {
                    return Err(ConfigError::DuplicateClaim {
                        path: location.path.clone(),
                        claim: claim.as_str().to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration, which
    /// denies all file access.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use files::{Claim, FileAccess};
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.log_level, "info");
        assert!(config.files.locations.is_empty());
        assert!(config.files.access_control().is_empty());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_locations() {
        let toml = r#"
[daemon]
log_level = "debug"

[files]
locations = [
    { path = "/var/www", claims = ["read", "write"] },
    { path = "/srv/docs", claims = ["read"] },
]
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(
            config.files.locations,
            vec![
                Location::read_write("/var/www"),
                Location::read_only("/srv/docs"),
            ]
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_access_control_from_config() {
        let config = Config::from_toml(
            r#"
[files]
locations = [{ path = "/var/www", claims = ["read", "write"] }]
"#,
        )
        .unwrap();

        let access = config.files.access_control();
        assert!(access.is_allowed(Path::new("/var/www/index.html"), FileAccess::Write));
        assert!(!access.is_allowed(Path::new("/etc/passwd"), FileAccess::Read));
    }

    #[test]
    fn test_location_without_claims() {
        let config = Config::from_toml(
            r#"
[files]
locations = [{ path = "/var/www" }]
"#,
        )
        .unwrap();
        assert!(config.files.locations[0].claims.is_empty());
    }

    #[test]
    fn test_unknown_claim_rejected() {
        let result = Config::from_toml(
            r#"
[files]
locations = [{ path = "/var/www", claims = ["execute"] }]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_helpful_error_messages() {
        let toml = r#"
[daemon]
log_level = 123
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.files.locations = vec![
            Location::read_write("%SystemDrive%\\inetpub"),
            Location::new("/srv/logs", vec![Claim::Read]),
        ];

        let toml = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&toml).unwrap(), config);
    }

    #[test]
    fn test_validate_default() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_location_path() {
        let mut config = Config::default();
        config.files.locations = vec![Location::read_only("/srv"), Location::read_only("  ")];
        assert_eq!(config.validate(), Err(ConfigError::EmptyLocationPath(1)));
    }

    #[test]
    fn test_validate_duplicate_claims() {
        let mut config = Config::default();
        config.files.locations = vec![Location::new("/srv", vec![Claim::Read, Claim::Read])];
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateClaim {
                path: "/srv".to_string(),
                claim: "read".to_string(),
            })
        );
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("dir").join("config.toml");

        let mut config = Config::default();
        config.files.locations = vec![Location::read_only("/srv")];
        config.save(&config_path).unwrap();

        assert!(config_path.exists());
        assert_eq!(Config::load(&config_path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("webadmin"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("WEBADMIN_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "trace");

        std::env::remove_var("WEBADMIN_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("WEBADMIN_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "info");

        std::env::remove_var("WEBADMIN_LOG_LEVEL");
    }
}
