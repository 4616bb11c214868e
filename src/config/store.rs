//! Durable store of hotfolder configurations (`config/hotfolders.json`).

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::HotfolderError;
use crate::license::LicenseGate;

use super::model::{HotfolderConfig, HotfolderId};

/// Owns the full set of hotfolder configurations and their on-disk
/// representation. Every mutating operation returns `(bool, String)` so the
/// GUI collaborator can present the message verbatim.
pub struct ConfigStore {
    path: PathBuf,
    configs: Vec<HotfolderConfig>,
}

impl ConfigStore {
    /// Load the store from `path`, or start empty if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HotfolderError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                configs: Vec::new(),
            });
        }

        let content =
            std::fs::read_to_string(&path).map_err(|source| HotfolderError::ConfigReadFailed {
                path: path.clone(),
                source,
            })?;
        let configs: Vec<HotfolderConfig> =
            serde_json::from_str(&content).map_err(|source| HotfolderError::ConfigParseFailed {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, configs })
    }

    fn save(&self) -> Result<(), HotfolderError> {
        let json =
            serde_json::to_vec_pretty(&self.configs).map_err(|source| HotfolderError::ConfigParseFailed {
                path: self.path.clone(),
                source,
            })?;
        crate::fsutil::atomic_write(&self.path, &json).map_err(|source| HotfolderError::ConfigWriteFailed {
            path: self.path.clone(),
            source,
        })
    }

    pub fn list(&self) -> &[HotfolderConfig] {
        &self.configs
    }

    pub fn get(&self, id: &str) -> Option<&HotfolderConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    fn index_of(&self, id: &str) -> Result<usize, HotfolderError> {
        self.configs
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| HotfolderError::UnknownHotfolder(id.to_string()))
    }

    /// Another enabled config (other than `exclude_id`) already claiming
    /// `input_path`, if any.
    fn conflicting_enabled(&self, input_path: &Path, exclude_id: &str) -> Option<&HotfolderConfig> {
        self.configs
            .iter()
            .find(|c| c.enabled && c.id != exclude_id && c.input_path == input_path)
    }

    /// Add a new, already-validated config. Fails if it is enabled and its
    /// input path collides with another enabled config.
    pub fn add(&mut self, config: HotfolderConfig) -> (bool, String) {
        if let Err(e) = config.validate() {
            return (false, e.to_string());
        }
        if config.enabled {
            if let Some(other) = self.conflicting_enabled(&config.input_path, &config.id) {
                let err = HotfolderError::DuplicateInputPath {
                    path: config.input_path.clone(),
                    other_name: other.name.clone(),
                };
                return (false, err.to_string());
            }
        }
        let id = config.id.clone();
        self.configs.push(config);
        match self.save() {
            Ok(()) => (true, id),
            Err(e) => (false, e.to_string()),
        }
    }

    /// Replace an existing config's definition in place (input path/enabled
    /// state follow the same collision rule as `add`).
    pub fn update(&mut self, config: HotfolderConfig) -> (bool, String) {
        if let Err(e) = config.validate() {
            return (false, e.to_string());
        }
        let idx = match self.index_of(&config.id) {
            Ok(idx) => idx,
            Err(e) => return (false, e.to_string()),
        };
        if config.enabled {
            if let Some(other) = self.conflicting_enabled(&config.input_path, &config.id) {
                let err = HotfolderError::DuplicateInputPath {
                    path: config.input_path.clone(),
                    other_name: other.name.clone(),
                };
                return (false, err.to_string());
            }
        }
        self.configs[idx] = config;
        match self.save() {
            Ok(()) => (true, "OK".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }

    pub fn remove(&mut self, id: &str) -> (bool, String) {
        let idx = match self.index_of(id) {
            Ok(idx) => idx,
            Err(e) => return (false, e.to_string()),
        };
        self.configs.remove(idx);
        match self.save() {
            Ok(()) => (true, "OK".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }

    /// Enable a config, subject to the license gate and the unique-input-path
    /// invariant across enabled configs.
    pub fn enable(&mut self, id: &str, license: &dyn LicenseGate) -> (bool, String) {
        if !license.is_licensed() {
            let err = HotfolderError::Unlicensed {
                name: id.to_string(),
            };
            return (false, err.to_string());
        }

        let idx = match self.index_of(id) {
            Ok(idx) => idx,
            Err(e) => return (false, e.to_string()),
        };
        let input_path = self.configs[idx].input_path.clone();
        if let Some(other) = self.conflicting_enabled(&input_path, id) {
            let err = HotfolderError::DuplicateInputPath {
                path: input_path,
                other_name: other.name.clone(),
            };
            return (false, err.to_string());
        }

        self.configs[idx].enabled = true;
        match self.save() {
            Ok(()) => {
                info!(hotfolder_id = %id, "hotfolder enabled");
                (true, "OK".to_string())
            }
            Err(e) => {
                self.configs[idx].enabled = false;
                (false, e.to_string())
            }
        }
    }

    pub fn disable(&mut self, id: &str) -> (bool, String) {
        let idx = match self.index_of(id) {
            Ok(idx) => idx,
            Err(e) => return (false, e.to_string()),
        };
        self.configs[idx].enabled = false;
        match self.save() {
            Ok(()) => (true, "OK".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }

    /// Export a config as a JSON value suitable for later re-import.
    pub fn export(&self, id: &str) -> Result<serde_json::Value, HotfolderError> {
        let config = self.get(id).ok_or_else(|| HotfolderError::UnknownHotfolder(id.to_string()))?;
        serde_json::to_value(config).map_err(|source| HotfolderError::ConfigParseFailed {
            path: self.path.clone(),
            source,
        })
    }

    /// Import a config from a previously exported JSON value: assigns a
    /// fresh id and forces `enabled=false` regardless of what was exported
    ///.
    pub fn import(&mut self, mut value: serde_json::Value) -> (bool, String) {
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "id".to_string(),
                serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
            );
            obj.insert("enabled".to_string(), serde_json::Value::Bool(false));
        }
        let config: HotfolderConfig = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                return (
                    false,
                    HotfolderError::ConfigParseFailed {
                        path: self.path.clone(),
                        source: e,
                    }
                    .to_string(),
                )
            }
        };
        self.add(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::AlwaysLicensed;

    fn cfg(name: &str, input: &str) -> HotfolderConfig {
        HotfolderConfig::builder(name, input).build().unwrap()
    }

    #[test]
    fn add_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();
        let (ok, _) = store.add(cfg("A", "/in/a"));
        assert!(ok);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn enabling_two_configs_with_same_input_path_fails_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();
        let license = AlwaysLicensed;

        let mut a = cfg("A", "/in/shared");
        a.enabled = true;
        let (ok, id_a) = store.add(a);
        assert!(ok);

        let b = cfg("B", "/in/shared");
        let (ok, id_b) = store.add(b);
        assert!(ok);

        let (ok, msg) = store.enable(&id_b, &license);
        assert!(!ok);
        assert!(msg.contains("already used"));
        let _ = id_a;
    }

    #[test]
    fn enable_fails_when_unlicensed() {
        struct NeverLicensed;
        impl LicenseGate for NeverLicensed {
            fn is_licensed(&self) -> bool {
                false
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();
        let (_, id) = store.add(cfg("A", "/in/a"));
        let (ok, _) = store.enable(&id, &NeverLicensed);
        assert!(!ok);
        assert!(!store.get(&id).unwrap().enabled);
    }

    #[test]
    fn import_assigns_fresh_id_and_forces_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join("hotfolders.json")).unwrap();
        let mut original = cfg("A", "/in/a");
        original.enabled = true;
        let exported = serde_json::to_value(&original).unwrap();

        let (ok, new_id) = store.import(exported);
        assert!(ok);
        assert_ne!(new_id, original.id);
        assert!(!store.get(&new_id).unwrap().enabled);
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotfolders.json");
        {
            let mut store = ConfigStore::load(&path).unwrap();
            store.add(cfg("A", "/in/a"));
        }
        let store2 = ConfigStore::load(&path).unwrap();
        assert_eq!(store2.list().len(), 1);
    }
}
