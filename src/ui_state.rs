//! Persisted UI State
//!
//! Small key/value store backing the settings the surrounding application
//! persists across runs: the lease auto-extension policy and the id of the
//! last-known running session (so a restarted application can attempt to
//! reattach). Values are JSON, written through to a single file on every
//! mutation.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::SessionResult;

/// Whether lease auto-extension is enabled.
pub const KEY_AUTO_EXTEND: &str = "autoExtend";
/// Minutes added per automatic lease extension.
pub const KEY_EXTENSION_MINUTES: &str = "extensionMinutes";
/// Id of the session left running when the application last exited.
pub const KEY_RUNNING_SESSION_ID: &str = "runningSessionId";

/// File-backed key/value store for UI state.
#[derive(Debug)]
pub struct UiStateStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl UiStateStore {
    /// Open the store at `path`, loading existing values if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> SessionResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Get a value, falling back to `default` when the key is missing or the
    /// stored value does not deserialize to `T`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.lock()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Set a value and write the store through to disk.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> SessionResult<()> {
        let mut values = self.lock();
        values.insert(key.to_string(), serde_json::to_value(value)?);
        self.persist(&values)
    }

    /// Remove a key and write the store through to disk.
    pub fn remove(&self, key: &str) -> SessionResult<()> {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> SessionResult<()> {
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ui_state.json");

        let store = UiStateStore::open(&path).unwrap();
        store.set(KEY_AUTO_EXTEND, &true).unwrap();
        store.set(KEY_EXTENSION_MINUTES, &15u32).unwrap();
        store
            .set(KEY_RUNNING_SESSION_ID, &"sess-123".to_string())
            .unwrap();
        drop(store);

        let reopened = UiStateStore::open(&path).unwrap();
        assert!(reopened.get_or(KEY_AUTO_EXTEND, false));
        assert_eq!(reopened.get_or(KEY_EXTENSION_MINUTES, 0u32), 15);
        assert_eq!(
            reopened.get_or(KEY_RUNNING_SESSION_ID, String::new()),
            "sess-123"
        );
    }

    #[test]
    fn missing_keys_fall_back_to_default() {
        let dir = tempdir().unwrap();
        let store = UiStateStore::open(dir.path().join("empty.json")).unwrap();
        assert_eq!(store.get_or("nope", 42u32), 42);
        assert!(!store.get_or(KEY_AUTO_EXTEND, false));
    }

    #[test]
    fn mismatched_type_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let store = UiStateStore::open(dir.path().join("ui_state.json")).unwrap();
        store.set("weird", &"not a number".to_string()).unwrap();
        assert_eq!(store.get_or("weird", 7u32), 7);
    }

    #[test]
    fn remove_deletes_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ui_state.json");
        let store = UiStateStore::open(&path).unwrap();
        store.set(KEY_RUNNING_SESSION_ID, &"sess-9".to_string()).unwrap();
        store.remove(KEY_RUNNING_SESSION_ID).unwrap();

        let reopened = UiStateStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_or::<Option<String>>(KEY_RUNNING_SESSION_ID, None),
            None
        );
    }
}
