//! Local backup of undelivered batches
//!
//! Every batch is written here before its first network attempt and removed
//! once fully delivered, so a crash or restart can re-submit it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{KeyValueStore, StorageError};
use crate::constants::{BACKUP_EVICTION_FRACTION, BACKUP_STORAGE_KEY};
use crate::logic::events::NormalizedEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub batch_id: Uuid,
    pub stored_at: DateTime<Utc>,
    pub events: Vec<NormalizedEvent>,
}

/// Bounded list of `BackupEntry` under one storage key, oldest first
#[derive(Clone)]
pub struct LocalBackup {
    store: Arc<dyn KeyValueStore>,
}

impl LocalBackup {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load_all(&self) -> Result<Vec<BackupEntry>, StorageError> {
        let mut found = self.store.get(&[BACKUP_STORAGE_KEY])?;
        match found.remove(BACKUP_STORAGE_KEY) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_all(&self, entries: &[BackupEntry]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return self.store.remove(&[BACKUP_STORAGE_KEY]);
        }
        let mut items = Map::new();
        items.insert(BACKUP_STORAGE_KEY.to_string(), serde_json::to_value(entries)?);
        self.store.set(items)
    }

    /// Insert or replace the entry for `batch_id`, then evict the oldest
    /// ~20% repeatedly until the list fits in `max_bytes`.
    ///
    /// Returns the number of entries evicted.
    pub fn persist(
        &self,
        batch_id: Uuid,
        events: &[NormalizedEvent],
        stored_at: DateTime<Utc>,
        max_bytes: usize,
    ) -> Result<usize, StorageError> {
        let mut entries = self.load_all()?;
        let entry = BackupEntry {
            batch_id,
            stored_at,
            events: events.to_vec(),
        };
        match entries.iter_mut().find(|e| e.batch_id == batch_id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }

        let mut evicted = 0;
        while !entries.is_empty() && serialized_size(&entries)? > max_bytes {
            let n = ((entries.len() as f64 * BACKUP_EVICTION_FRACTION).ceil() as usize).max(1);
            evicted += entries.drain(..n.min(entries.len())).len();
        }
        if evicted > 0 {
            log::warn!("Backup over {} bytes, evicted {} oldest batches", max_bytes, evicted);
        }

        self.save_all(&entries)?;
        Ok(evicted)
    }

    /// Drop the entry for a fully delivered batch
    pub fn remove(&self, batch_id: Uuid) -> Result<bool, StorageError> {
        let mut entries = self.load_all()?;
        let before = entries.len();
        entries.retain(|e| e.batch_id != batch_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save_all(&entries)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&[BACKUP_STORAGE_KEY])
    }
}

fn serialized_size(entries: &[BackupEntry]) -> Result<usize, StorageError> {
    Ok(serde_json::to_vec(entries)?.len())
}

impl std::fmt::Debug for LocalBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackup").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::events::Route;
    use crate::logic::storage::MemoryStore;
    use serde_json::json;

    fn events(n: usize) -> Vec<NormalizedEvent> {
        (0..n)
            .map(|i| {
                let mut payload = Map::new();
                payload.insert("url".into(), json!(format!("https://a.example/{}", i)));
                NormalizedEvent::new(Route::NetworkLog, payload, "s", None, Utc::now())
            })
            .collect()
    }

    fn backup() -> LocalBackup {
        LocalBackup::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_persist_upserts_by_batch_id() {
        let backup = backup();
        let id = Uuid::new_v4();

        backup.persist(id, &events(3), Utc::now(), usize::MAX).unwrap();
        backup.persist(id, &events(1), Utc::now(), usize::MAX).unwrap();

        let all = backup.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].events.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let backup = backup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        backup.persist(a, &events(1), Utc::now(), usize::MAX).unwrap();
        backup.persist(b, &events(1), Utc::now(), usize::MAX).unwrap();

        assert!(backup.remove(a).unwrap());
        assert!(!backup.remove(a).unwrap());
        assert_eq!(backup.load_all().unwrap()[0].batch_id, b);

        backup.clear().unwrap();
        assert!(backup.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest_first() {
        let backup = backup();
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            backup.persist(*id, &events(2), Utc::now(), usize::MAX).unwrap();
        }
        let full = serialized_size(&backup.load_all().unwrap()).unwrap();

        // Budget for roughly half the entries
        let evicted = backup
            .persist(Uuid::new_v4(), &events(2), Utc::now(), full / 2)
            .unwrap();
        assert!(evicted >= 5);

        let remaining = backup.load_all().unwrap();
        assert!(serialized_size(&remaining).unwrap() <= full / 2);
        assert!(!remaining.iter().any(|e| e.batch_id == ids[0]));
        assert!(!remaining.is_empty());
    }

    #[test]
    fn test_eviction_count_matches_entries_removed() {
        let backup = backup();
        for _ in 0..3 {
            backup.persist(Uuid::new_v4(), &events(1), Utc::now(), usize::MAX).unwrap();
        }

        // Nothing fits, so every entry goes, the new one included
        let evicted = backup.persist(Uuid::new_v4(), &events(1), Utc::now(), 1).unwrap();
        assert_eq!(evicted, 4);
        assert!(backup.load_all().unwrap().is_empty());
    }
}
