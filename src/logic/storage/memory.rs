use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{KeyValueStore, StorageError};

/// In-memory key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let data = self.data.lock();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        self.data.lock().extend(items);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}
