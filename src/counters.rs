//! Durable monotonic counters keyed by name.
//!
//! Storage is a single JSON document `{ "name": value, ... }`. Every write
//! goes through the two-phase protocol the original `CounterManager` used:
//! rename the live file to `.backup`, write the new content to a temp file,
//! `sync_all`, rename over the target, then remove `.backup`. If anything
//! fails after the live file was moved aside, `.backup` is restored before
//! the error is returned, so a crash mid-write never loses the previous
//! good state. On load, a missing `counters.json` with a leftover
//! `.backup` recovers from the backup rather than starting empty — the
//! natural completion of the same crash-recovery protocol.
//!
//! All operations serialize under a single `Mutex`; `get_and_increment`
//! returns the value *before* increment and persists the new value before
//! returning, matching `counter_manager.py`'s `get_and_increment`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::HotfolderError;

/// A durable, process-wide store of named monotonic integers.
///
/// Constructed once at application start-up and passed down explicitly —
/// never reached via an ambient singleton.
pub struct CounterStore {
    path: PathBuf,
    counters: Mutex<HashMap<String, i64>>,
}

impl CounterStore {
    /// Open (or create) the counter store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let counters = load(&path);
        Self {
            path,
            counters: Mutex::new(counters),
        }
    }

    /// Return the current value and increment it by `step`, initialising
    /// to `start` if the counter does not yet exist.
    ///
    /// The *first* call to establish a fresh counter decides
    /// `start`; subsequent calls with a different `start` for an existing
    /// counter are ignored — the store, not the caller, is authoritative.
    pub fn get_and_increment(&self, name: &str, start: i64, step: i64) -> i64 {
        let mut guard = self.counters.lock().unwrap();
        let current = *guard.entry(name.to_string()).or_insert(start);
        guard.insert(name.to_string(), current + step);
        self.persist(&guard);
        current
    }

    /// Return the current value without mutating it.
    pub fn get(&self, name: &str, default: i64) -> i64 {
        let guard = self.counters.lock().unwrap();
        *guard.get(name).unwrap_or(&default)
    }

    /// Set a counter to an explicit value.
    pub fn set(&self, name: &str, value: i64) {
        let mut guard = self.counters.lock().unwrap();
        guard.insert(name.to_string(), value);
        self.persist(&guard);
    }

    /// Reset a counter to `start` (alias of `set` kept for API parity with
    /// the original `reset_counter`).
    pub fn reset(&self, name: &str, start: i64) {
        self.set(name, start);
    }

    /// Delete a counter. Returns `true` if it existed.
    pub fn delete(&self, name: &str) -> bool {
        let mut guard = self.counters.lock().unwrap();
        let existed = guard.remove(name).is_some();
        if existed {
            self.persist(&guard);
        }
        existed
    }

    /// Return a snapshot of every counter.
    pub fn list(&self) -> HashMap<String, i64> {
        self.counters.lock().unwrap().clone()
    }

    /// Delete every counter.
    pub fn clear_all(&self) {
        let mut guard = self.counters.lock().unwrap();
        guard.clear();
        self.persist(&guard);
    }

    fn persist(&self, counters: &HashMap<String, i64>) {
        if let Err(e) = save(&self.path, counters) {
            warn!("failed to persist counter store {}: {e}", self.path.display());
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".backup");
    PathBuf::from(s)
}

fn load(path: &Path) -> HashMap<String, i64> {
    let backup = backup_path(path);

    let source = if path.exists() {
        Some(path.to_path_buf())
    } else if backup.exists() {
        debug!("counters.json missing, recovering from {}", backup.display());
        Some(backup.clone())
    } else {
        None
    };

    let Some(source) = source else {
        return HashMap::new();
    };

    match std::fs::read_to_string(&source) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return HashMap::new();
            }
            match serde_json::from_str(trimmed) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        "counter store {} is corrupt ({e}); starting from an empty map",
                        source.display()
                    );
                    HashMap::new()
                }
            }
        }
        Err(e) => {
            warn!("failed to read counter store {}: {e}", source.display());
            HashMap::new()
        }
    }
}

fn save(path: &Path, counters: &HashMap<String, i64>) -> Result<(), HotfolderError> {
    let backup = backup_path(path);

    if path.exists() {
        if backup.exists() {
            let _ = std::fs::remove_file(&backup);
        }
        std::fs::rename(path, &backup).map_err(|e| HotfolderError::CounterStore(e.to_string()))?;
    }

    let write_result = (|| -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(counters)?;
        crate::fsutil::atomic_write(path, &json)
    })();

    match write_result {
        Ok(()) => {
            let _ = std::fs::remove_file(&backup);
            Ok(())
        }
        Err(e) => {
            if backup.exists() {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let _ = std::fs::rename(&backup, path);
            }
            Err(HotfolderError::CounterStore(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_increment_returns_value_before_increment() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));

        assert_eq!(store.get_and_increment("invoice", 1, 1), 1);
        assert_eq!(store.get_and_increment("invoice", 1, 1), 2);
        assert_eq!(store.get_and_increment("invoice", 1, 1), 3);
    }

    #[test]
    fn second_call_start_argument_is_ignored_once_established() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));

        assert_eq!(store.get_and_increment("n", 100, 1), 100);
        // A different `start` on a later call must not reset the counter.
        assert_eq!(store.get_and_increment("n", 5, 1), 101);
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));
        store.set("n", 42);
        assert_eq!(store.get("n", 0), 42);
    }

    #[test]
    fn reset_then_increment_returns_new_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));
        store.get_and_increment("n", 1, 1);
        store.reset("n", 10);
        assert_eq!(store.get_and_increment("n", 1, 1), 10);
    }

    #[test]
    fn delete_reports_prior_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));
        assert!(!store.delete("n"));
        store.set("n", 1);
        assert!(store.delete("n"));
        assert_eq!(store.get("n", -1), -1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        {
            let store = CounterStore::open(&path);
            store.get_and_increment("invoice", 1, 1);
            store.get_and_increment("invoice", 1, 1);
        }
        let store2 = CounterStore::open(&path);
        assert_eq!(store2.get("invoice", 0), 3);
    }

    #[test]
    fn corrupt_file_loads_as_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = CounterStore::open(&path);
        assert_eq!(store.list().len(), 0);
    }

    #[test]
    fn recovers_from_backup_when_live_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        let backup = backup_path(&path);
        std::fs::write(&backup, b"{\"invoice\": 7}").unwrap();

        let store = CounterStore::open(&path);
        assert_eq!(store.get("invoice", 0), 7);
    }

    #[test]
    fn list_returns_full_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));
        store.set("a", 1);
        store.set("b", 2);
        let snapshot = store.list();
        assert_eq!(snapshot.get("a"), Some(&1));
        assert_eq!(snapshot.get("b"), Some(&2));
    }

    #[test]
    fn clear_all_empties_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path().join("counters.json"));
        store.set("a", 1);
        store.clear_all();
        assert_eq!(store.list().len(), 0);
    }
}
