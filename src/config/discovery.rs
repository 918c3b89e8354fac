//! Config discovery for tailfollow.
//!
//! Walks parent directories to find `tailfollow.yaml` and checks for a global
//! config at `<config dir>/tailfollow/config.yaml`.

use std::path::{Path, PathBuf};

/// Project config filename to search for in parent directories.
pub const PROJECT_CONFIG_NAME: &str = "tailfollow.yaml";

/// Global config filename within the tailfollow config directory.
pub const GLOBAL_CONFIG_NAME: &str = "config.yaml";

/// Result of config discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Nearest `tailfollow.yaml` at or above the starting directory.
    pub project_config: Option<PathBuf>,
    /// `<config dir>/tailfollow/config.yaml`, if it exists.
    pub global_config: Option<PathBuf>,
}

impl DiscoveryResult {
    /// Returns true if any config was found (project or global).
    pub fn has_config(&self) -> bool {
        self.project_config.is_some() || self.global_config.is_some()
    }
}

/// Discover config files starting from the current working directory.
pub fn discover() -> DiscoveryResult {
    let global_dir = dirs::config_dir().map(|dir| dir.join("tailfollow"));
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir.canonicalize().unwrap_or(dir),
        Err(_) => {
            return DiscoveryResult {
                project_config: None,
                global_config: global_dir.as_deref().and_then(global_config_in),
            }
        }
    };
    discover_from(&cwd, global_dir.as_deref())
}

/// Discover config files walking up from `start`, with the global config
/// looked up in `global_dir`.
pub fn discover_from(start: &Path, global_dir: Option<&Path>) -> DiscoveryResult {
    let project_config = start
        .ancestors()
        .map(|ancestor| ancestor.join(PROJECT_CONFIG_NAME))
        .find(|candidate| is_file(candidate));

    DiscoveryResult {
        project_config,
        global_config: global_dir.and_then(global_config_in),
    }
}

fn global_config_in(dir: &Path) -> Option<PathBuf> {
    let path = dir.join(GLOBAL_CONFIG_NAME);
    is_file(&path).then_some(path)
}

fn is_file(path: &Path) -> bool {
    path.try_exists().unwrap_or(false) && path.is_file()
}
