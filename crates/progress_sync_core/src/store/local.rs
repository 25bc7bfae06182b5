//! crates/progress_sync_core/src/store/local.rs
//!
//! `LocalStore` implementations: a process-local map, and a single JSON object
//! file for devices that need the id to survive restarts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::ports::{LocalStore, PortError, PortResult};

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, String>>,
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Keeps every key in one JSON object file, rewritten on each `set`.
#[derive(Debug)]
pub struct JsonFileLocalStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileLocalStore {
    /// Opens the file at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> PortResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                PortError::InvalidInput(format!("{} is not a JSON object: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(PortError::Unavailable(e.to_string())),
        };
        debug!(path = %path.display(), "Opened local store.");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }
}

impl LocalStore for JsonFileLocalStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        let raw = serde_json::to_string_pretty(&*values)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| PortError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_store_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!("local-store-{}.json", uuid::Uuid::new_v4()));
        {
            let store = JsonFileLocalStore::open(&path).unwrap();
            assert_eq!(store.get("device_id"), None);
            store.set("device_id", "device_abc").unwrap();
        }
        let reopened = JsonFileLocalStore::open(&path).unwrap();
        assert_eq!(reopened.get("device_id").as_deref(), Some("device_abc"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("local-store-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            JsonFileLocalStore::open(&path),
            Err(PortError::InvalidInput(_))
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
