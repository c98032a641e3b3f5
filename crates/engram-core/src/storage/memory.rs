//! # In-memory KV Adapter
//!
//! A volatile store over a locked `BTreeMap`. Snapshots clone the map,
//! which gives the same point-in-time isolation the redb backend gets
//! from MVCC. Intended for tests and ephemeral sessions; nothing
//! survives the process.

use crate::storage::{KvSnapshot, KvStore};
use crate::types::MemoryError;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A volatile KV store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    records: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn scan_map(
    records: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    records
        .range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl KvStore for MemoryKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), MemoryError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        records.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MemoryError> {
        let records = self
            .records
            .read()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(records.get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<(), MemoryError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        records.remove(key);
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn KvSnapshot + '_>, MemoryError> {
        let records = self
            .records
            .read()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(Box::new(MemorySnapshot {
            records: records.clone(),
        }))
    }
}

/// A point-in-time copy of the store contents.
pub struct MemorySnapshot {
    records: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl KvSnapshot for MemorySnapshot {
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemoryError> {
        Ok(scan_map(&self.records, prefix))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryKv::new();

        store.put(b"k", b"v").expect("put");
        assert_eq!(store.get(b"k").expect("get"), Some(b"v".to_vec()));

        store.delete(b"k").expect("delete");
        assert_eq!(store.get(b"k").expect("get"), None);
    }

    #[test]
    fn scan_prefix_ordered() {
        let store = MemoryKv::new();
        store.put(b"ns:b", b"2").expect("put");
        store.put(b"ns:a", b"1").expect("put");
        store.put(b"other:c", b"3").expect("put");

        let records = store.scan_prefix(b"ns:").expect("scan");
        let keys: Vec<&[u8]> = records.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"ns:a".as_slice(), b"ns:b".as_slice()]);
    }

    #[test]
    fn snapshot_isolation() {
        let store = MemoryKv::new();
        store.put(b"k:1", b"v").expect("put");

        let snapshot = store.snapshot().expect("snapshot");
        store.put(b"k:2", b"v").expect("put");

        assert_eq!(snapshot.scan_prefix(b"k:").expect("scan").len(), 1);
        assert_eq!(store.scan_prefix(b"k:").expect("scan").len(), 2);
    }
}
