//! Process-wide runtime settings (`config/settings.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::HotfolderError;

/// Settings read once at core construction and written back with defaults
/// synthesised if the file was absent.
///
/// `extra` preserves any key this version of the engine doesn't recognise,
/// so a settings file shared with another tool version round-trips without
/// data loss (Open Question decision, see `DESIGN.md`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory searched first when resolving external tool binaries
    /// (ghostscript, tesseract). `None` means "adjacent to the executable".
    #[serde(default)]
    pub dependencies_dir: Option<PathBuf>,

    /// How long (ms) a candidate file's size/mtime must be unchanged
    /// before the supervisor treats it as stable and ready to process.
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,

    /// How long (ms) the supervisor waits for a PDF's matching XML sidecar
    /// before bucketing it as `UNPAIRED_INPUT`.
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,

    /// Number of concurrently running pipeline workers.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Bounded work-queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Unrecognised keys, preserved verbatim across load/save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_stability_window_ms() -> u64 {
    2_000
}

fn default_pairing_timeout_ms() -> u64 {
    30_000
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dependencies_dir: None,
            stability_window_ms: default_stability_window_ms(),
            pairing_timeout_ms: default_pairing_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            queue_capacity: default_queue_capacity(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, synthesising and writing defaults if the
    /// file does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self, HotfolderError> {
        if !path.exists() {
            info!("no settings file at {}, writing defaults", path.display());
            let settings = Settings::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let content =
            std::fs::read_to_string(path).map_err(|source| HotfolderError::ConfigReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&content).map_err(|source| {
            warn!("settings file {} is invalid: {source}", path.display());
            HotfolderError::ConfigParseFailed {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), HotfolderError> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| {
            HotfolderError::ConfigParseFailed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        crate::fsutil::atomic_write(path, &json).map_err(|source| HotfolderError::ConfigWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_init_writes_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.worker_pool_size, 4);
    }

    #[test]
    fn unknown_keys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"stability_window_ms": 500, "future_option": "keep-me"}"#,
        )
        .unwrap();

        let settings = Settings::load_or_init(&path).unwrap();
        assert_eq!(settings.stability_window_ms, 500);
        assert_eq!(
            settings.extra.get("future_option").and_then(|v| v.as_str()),
            Some("keep-me")
        );

        settings.save(&path).unwrap();
        let reloaded = Settings::load_or_init(&path).unwrap();
        assert_eq!(
            reloaded.extra.get("future_option").and_then(|v| v.as_str()),
            Some("keep-me")
        );
    }
}
