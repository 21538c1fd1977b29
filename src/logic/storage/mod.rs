//! Durable Storage
//!
//! Key-value persistence used for the local batch backup and the
//! statistics snapshot.
//!
//! ## Structure
//! - `memory.rs` - in-process store (tests, ephemeral runs)
//! - `file.rs` - single JSON file under the app data directory
//! - `backup.rs` - bounded backup list of undelivered batches

pub mod memory;
pub mod file;
pub mod backup;

pub use memory::MemoryStore;
pub use file::FileStore;
pub use backup::{BackupEntry, LocalBackup};

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// `get(keys)` / `set(map)` / `remove(keys)` key-value interface
pub trait KeyValueStore: Send + Sync {
    /// Values for the requested keys; missing keys are simply absent
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;

    /// Insert or overwrite every entry in `items`
    fn set(&self, items: Map<String, Value>) -> Result<(), StorageError>;

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError>;
}
