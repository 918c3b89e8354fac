//! Config types for tailfollow.
//!
//! [`TailConfig`] is the immutable runtime configuration captured when a tail
//! session starts. [`RawConfig`] mirrors the YAML config file.

use serde::Deserialize;
use std::time::Duration;

use crate::encoding::Encoding;
use crate::error::TailError;

/// Bytes requested per read unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Keys accepted in a config file, used for typo suggestions.
pub const KNOWN_FIELDS: &[&str] = &[
    "chunk_size",
    "follow",
    "survive_rotation",
    "poll_interval_ms",
    "encoding",
    "tag_offsets",
    "delimiter",
];

/// Options of one tail session. Fixed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    /// Bytes requested per read.
    pub chunk_size: usize,
    /// Keep watching after reaching the end of the file. When false the
    /// session ends after the first full drain.
    pub follow: bool,
    /// Reattach to a new file created at the same path after a rotation
    /// instead of following the renamed file.
    pub survive_rotation: bool,
    /// Periodic stat-based rename and growth check.
    pub poll_interval: Option<Duration>,
    /// Decode chunks to text instead of delivering raw bytes.
    pub encoding: Option<Encoding>,
    /// Tag every chunk with the file offset of its first byte.
    pub tag_offsets: bool,
    /// Register change notifications. Disabling this emulates platforms
    /// where notifications never fire, leaving detection to polling.
    pub register_watches: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            follow: true,
            survive_rotation: false,
            poll_interval: None,
            encoding: None,
            tag_offsets: false,
            register_watches: true,
        }
    }
}

impl TailConfig {
    pub fn validate(&self) -> Result<(), TailError> {
        if self.chunk_size == 0 {
            return Err(TailError::usage("chunk_size must be greater than 0"));
        }
        if let Some(interval) = self.poll_interval {
            if interval < Duration::from_millis(1) {
                return Err(TailError::usage(
                    "poll interval must be at least 1 millisecond",
                ));
            }
        }
        Ok(())
    }
}

/// Raw config file structure (used for parsing).
///
/// Every key is optional so files can be layered: later files only
/// override what they set. Unknown fields are rejected with an error.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub chunk_size: Option<usize>,
    pub follow: Option<bool>,
    pub survive_rotation: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub encoding: Option<Encoding>,
    pub tag_offsets: Option<bool>,
    /// Record delimiter used by `--records`. Backslash escapes are allowed.
    pub delimiter: Option<String>,
}

impl RawConfig {
    /// Layer `top` over `self`; keys set in `top` win.
    pub fn overlay(self, top: RawConfig) -> RawConfig {
        RawConfig {
            chunk_size: top.chunk_size.or(self.chunk_size),
            follow: top.follow.or(self.follow),
            survive_rotation: top.survive_rotation.or(self.survive_rotation),
            poll_interval_ms: top.poll_interval_ms.or(self.poll_interval_ms),
            encoding: top.encoding.or(self.encoding),
            tag_offsets: top.tag_offsets.or(self.tag_offsets),
            delimiter: top.delimiter.or(self.delimiter),
        }
    }

    /// Resolve into a runtime config, starting from the defaults.
    pub fn to_tail_config(&self) -> TailConfig {
        let defaults = TailConfig::default();
        TailConfig {
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            follow: self.follow.unwrap_or(defaults.follow),
            survive_rotation: self.survive_rotation.unwrap_or(defaults.survive_rotation),
            poll_interval: self.poll_interval_ms.map(Duration::from_millis),
            encoding: self.encoding.or(defaults.encoding),
            tag_offsets: self.tag_offsets.unwrap_or(defaults.tag_offsets),
            register_watches: defaults.register_watches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TailConfig::default();
        assert_eq!(config.chunk_size, 16384);
        assert!(config.follow);
        assert!(!config.survive_rotation);
        assert!(config.poll_interval.is_none());
        assert!(config.encoding.is_none());
        assert!(!config.tag_offsets);
        assert!(config.register_watches);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = TailConfig {
            chunk_size: 0,
            ..TailConfig::default()
        };
        assert!(matches!(config.validate(), Err(TailError::Usage(_))));
    }

    #[test]
    fn test_sub_millisecond_poll_rejected() {
        let config = TailConfig {
            poll_interval: Some(Duration::from_micros(10)),
            ..TailConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlay_prefers_top() {
        let global = RawConfig {
            chunk_size: Some(1024),
            follow: Some(false),
            delimiter: Some("\\n".to_string()),
            ..RawConfig::default()
        };
        let project = RawConfig {
            chunk_size: Some(4096),
            survive_rotation: Some(true),
            ..RawConfig::default()
        };

        let merged = global.overlay(project);
        assert_eq!(merged.chunk_size, Some(4096));
        assert_eq!(merged.follow, Some(false));
        assert_eq!(merged.survive_rotation, Some(true));
        assert_eq!(merged.delimiter.as_deref(), Some("\\n"));
    }

    #[test]
    fn test_to_tail_config() {
        let raw = RawConfig {
            poll_interval_ms: Some(250),
            encoding: Some(Encoding::Utf8),
            tag_offsets: Some(true),
            ..RawConfig::default()
        };
        let config = raw.to_tail_config();
        assert_eq!(config.poll_interval, Some(Duration::from_millis(250)));
        assert_eq!(config.encoding, Some(Encoding::Utf8));
        assert!(config.tag_offsets);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
