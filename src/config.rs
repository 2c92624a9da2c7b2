// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `EngineConfig`: on-disk configuration for plugin discovery and playback
//! defaults, loaded from a platform config directory via `directories` and
//! parsed with `serde`/`toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ErrorCode, HsResult};

fn default_sync_timeout_ms() -> u64 {
    5_000
}

fn default_decoder_retry_count() -> u32 {
    3
}

fn default_decoder_retry_backoff_ms() -> u64 {
    10
}

/// Engine-wide configuration, persisted as TOML under the platform config
/// directory (`~/.config/histreamer/config.toml` on Linux).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directories scanned for native plugin libraries at startup.
    pub plugin_search_paths: Vec<PathBuf>,
    /// Budget for `send_event` calls that don't specify their own timeout.
    #[serde(rename = "sync_event_timeout_ms")]
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_event_timeout_ms: u64,
    /// Whether newly created players loop by default.
    pub default_looping: bool,
    /// How many times a codec filter retries a transient (`Again`) error
    /// before surfacing it upward.
    #[serde(default = "default_decoder_retry_count")]
    pub decoder_retry_count: u32,
    /// Delay between decoder retries.
    #[serde(default = "default_decoder_retry_backoff_ms")]
    pub decoder_retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plugin_search_paths: Vec::new(),
            sync_event_timeout_ms: default_sync_timeout_ms(),
            default_looping: false,
            decoder_retry_count: default_decoder_retry_count(),
            decoder_retry_backoff_ms: default_decoder_retry_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// `send_event`'s default timeout, as a `Duration`.
    pub fn sync_event_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_event_timeout_ms)
    }

    /// Delay between decoder retries, as a `Duration`.
    pub fn decoder_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.decoder_retry_backoff_ms)
    }

    /// Standard config file location: `<config dir>/histreamer/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "histreamer").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or fall back to defaults if the file is absent.
    /// A present-but-malformed file is an error rather than a silent
    /// fallback, so a typo in the user's config doesn't go unnoticed.
    pub fn load(path: &Path) -> HsResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = toml::from_str(&contents).map_err(|e| {
                    warn!(path = %path.display(), error = %e, "malformed config file");
                    ErrorCode::InvalidParameter
                })?;
                info!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from [`EngineConfig::default_path`], or defaults if the
    /// platform has no usable config directory.
    pub fn load_default() -> HsResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Serialize to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> HsResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ErrorCode::Unknown)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|_| ErrorCode::Unknown)?;
        fs::write(path, contents).map_err(|_| ErrorCode::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.sync_event_timeout_ms, 5_000);
        assert!(!config.default_looping);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = EngineConfig::default();
        config.default_looping = true;
        config.plugin_search_paths.push(PathBuf::from("/opt/histreamer/plugins"));
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert!(loaded.default_looping);
        assert_eq!(loaded.plugin_search_paths.len(), 1);
    }

    #[test]
    fn malformed_file_is_an_error_not_a_silent_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{").unwrap();
        assert_eq!(EngineConfig::load(&path).err(), Some(ErrorCode::InvalidParameter));
    }
}
