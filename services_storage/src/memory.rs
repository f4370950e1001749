//! In-memory record store

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::record::{RecordKey, RecordStore, StorageError};

/// Record store that lives only as long as the process
///
/// Writes are atomic by construction: the map entry is replaced in one step.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<BTreeMap<RecordKey, Vec<u8>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, in order
    pub fn keys(&self) -> Vec<RecordKey> {
        match self.records.lock() {
            Ok(records) => records.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    fn with_records<R>(&self, f: impl FnOnce(&mut BTreeMap<RecordKey, Vec<u8>>) -> R) -> R {
        let mut guard = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl RecordStore for MemoryJournal {
    fn write(&self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        self.with_records(|records| records.insert(key, bytes.to_vec()));
        Ok(())
    }

    fn read(&self, key: RecordKey) -> Result<Vec<u8>, StorageError> {
        self.with_records(|records| records.get(&key).cloned())
            .ok_or(StorageError::NotFound { key })
    }

    fn delete(&self, key: RecordKey) -> Result<(), StorageError> {
        self.with_records(|records| records.remove(&key));
        Ok(())
    }
}
