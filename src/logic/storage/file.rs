//! JSON-file key-value store
//!
//! The whole map is rewritten on every `set`/`remove`; the store only holds
//! the backup list and one statistics snapshot, so the file stays small.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{KeyValueStore, StorageError};
use crate::constants::APP_NAME;

pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// `<data_local_dir>/sentinel-relay/storage.json`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("storage.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let data = fs::read(&self.path)?;
        if data.is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let _guard = self.lock.lock();
        let mut all = self.read_all()?;
        Ok(keys
            .iter()
            .filter_map(|k| all.remove(*k).map(|v| (k.to_string(), v)))
            .collect())
    }

    fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut all = self.read_all()?;
        all.extend(items);
        self.write_all(&all)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut all = self.read_all()?;
        let before = all.len();
        for key in keys {
            all.remove(*key);
        }
        if all.len() != before {
            self.write_all(&all)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}
