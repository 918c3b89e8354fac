//! Config loading for tailfollow.
//!
//! Loads and validates YAML config files and layers them.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::discovery::DiscoveryResult;
use crate::config::error::ConfigError;
use crate::config::types::RawConfig;

/// Expand tilde in path to home directory.
///
/// Handles the following cases:
/// - `~/foo` -> `/home/user/foo`
/// - `/absolute/path` -> unchanged
/// - `relative/path` -> unchanged
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    path.to_path_buf()
}

/// Load, parse and validate one YAML config file.
pub fn load_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    // A file holding only comments is a valid, empty config.
    let has_content = content
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'));
    if !has_content {
        return Ok(RawConfig::default());
    }

    let raw: RawConfig = serde_saphyr::from_str(&content)
        .map_err(|e| ConfigError::from_saphyr_error(path.to_path_buf(), e))?;
    validate(path, &raw)?;
    Ok(raw)
}

/// Load and layer discovered configs: global first, project on top.
///
/// Returns an empty config if no config files exist.
pub fn load(discovery: &DiscoveryResult) -> Result<RawConfig, ConfigError> {
    let mut config = RawConfig::default();

    if let Some(global_path) = &discovery.global_config {
        config = config.overlay(load_file(global_path)?);
    }

    if let Some(project_path) = &discovery.project_config {
        config = config.overlay(load_file(project_path)?);
    }

    Ok(config)
}

fn validate(path: &Path, raw: &RawConfig) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::Validation {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    if raw.chunk_size == Some(0) {
        return Err(invalid("chunk_size must be greater than 0"));
    }
    if raw.poll_interval_ms == Some(0) {
        return Err(invalid("poll_interval_ms must be at least 1"));
    }
    if raw.delimiter.as_deref() == Some("") {
        return Err(invalid("delimiter must not be empty"));
    }
    Ok(())
}
