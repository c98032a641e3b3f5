//! # redb-backed KV Adapter
//!
//! Disk-backed storage using the redb embedded database:
//! - ACID transactions, crash safety (copy-on-write B-trees)
//! - MVCC: concurrent readers, single writer
//! - `begin_read()` gives the consistent snapshot the upper layers
//!   require for batch scans
//!
//! All records live in one byte-key table; the namespaced key layout is
//! the callers' concern.

use crate::storage::{KvSnapshot, KvStore};
use crate::types::MemoryError;
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition};
use std::path::Path;

/// Single table for all records: raw key bytes -> raw value bytes.
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// A disk-backed KV store using redb.
pub struct RedbKv {
    db: Database,
}

impl std::fmt::Debug for RedbKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKv").finish_non_exhaustive()
    }
}

impl RedbKv {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the database cannot be
    /// opened or the table cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        // Create the table up front so empty-store scans succeed.
        let write_txn = db
            .begin_write()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        let _ = write_txn
            .open_table(RECORDS)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        Ok(Self { db })
    }

    /// Compact the database file.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if compaction fails.
    pub fn compact(&mut self) -> Result<(), MemoryError> {
        self.db
            .compact()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(())
    }
}

impl KvStore for RedbKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), MemoryError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(|e| MemoryError::StorageError(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MemoryError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        let table = read_txn
            .open_table(RECORDS)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        let value = table
            .get(key)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), MemoryError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(|e| MemoryError::StorageError(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn KvSnapshot + '_>, MemoryError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(Box::new(RedbSnapshot { txn }))
    }
}

/// A point-in-time read view backed by a redb read transaction.
pub struct RedbSnapshot {
    txn: ReadTransaction,
}

impl KvSnapshot for RedbSnapshot {
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemoryError> {
        let table = self
            .txn
            .open_table(RECORDS)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        let mut records = Vec::new();
        for entry in table
            .range::<&[u8]>(prefix..)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?
        {
            let (key, value) = entry.map_err(|e| MemoryError::StorageError(e.to_string()))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            records.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(records)
    }
}

// =============================================================================
// TESTS
// =============================================================================
