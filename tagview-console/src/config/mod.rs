//! Configuration module for tagview-console.
//!
//! Handles loading configuration from the TOML file plus CLI overrides,
//! with validation and SIGHUP-driven reload.

pub mod file;

use crate::config::file::FileConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loads (and reloads) the configuration file, applying CLI overrides.
pub struct ConfigLoader {
    path: PathBuf,
    server_override: Option<Url>,
}

impl ConfigLoader {
    /// Create a loader for the given path.
    ///
    /// `server_override` replaces the file's `base_url` when present
    /// (the `--server` CLI flag).
    pub fn new(path: &Path, server_override: Option<Url>) -> Self {
        Self {
            path: path.to_path_buf(),
            server_override,
        }
    }

    /// Load and validate the configuration.
    pub fn load(&self) -> Result<FileConfig, ConfigError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let mut config: FileConfig = toml::from_str(&raw)?;

        if let Some(base_url) = &self.server_override {
            config.server.base_url = base_url.clone();
        }

        validate(&config)?;
        Ok(config)
    }

    /// Re-read the file (SIGHUP). Overrides still apply.
    pub fn reload(&self) -> Result<FileConfig, ConfigError> {
        self.load()
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.console.pending_ttl_ms == 0 {
        return Err(ConfigError::ValidationError(
            "console.pending_ttl_ms must be positive".to_owned(),
        ));
    }
    if config.console.sweep_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "console.sweep_interval_ms must be positive".to_owned(),
        ));
    }
    if config.console.page_size == 0 {
        return Err(ConfigError::ValidationError(
            "console.page_size must be positive".to_owned(),
        ));
    }

    let mut ids: Vec<&str> = config.scanners.iter().map(|s| s.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != config.scanners.len() {
        return Err(ConfigError::ValidationError(
            "duplicate scanner ids".to_owned(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::{ConsoleConfig, ScannerConfig, ServerConfig};

    fn base_config() -> FileConfig {
        FileConfig {
            server: ServerConfig {
                base_url: "https://inventory.example.com"
                    .parse()
                    .expect("valid url"),
                push_url: None,
            },
            console: ConsoleConfig::default(),
            scanners: vec![ScannerConfig { id: "dock-3".into() }],
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = base_config();
        config.console.pending_ttl_ms = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_scanners() {
        let mut config = base_config();
        config.scanners.push(ScannerConfig { id: "dock-3".into() });
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
