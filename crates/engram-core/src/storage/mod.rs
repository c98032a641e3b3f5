//! # Storage Module
//!
//! The namespaced byte-key/byte-value adapter every upper layer goes
//! through. The adapter does not interpret keys; ordering is
//! lexicographic on raw bytes.
//!
//! Two backends are provided:
//! - [`RedbKv`]: disk-backed via redb (ACID transactions, MVCC snapshots)
//! - [`MemoryKv`]: volatile, for tests and ephemeral use
//!
//! Snapshot reads are consistent with a point in time; a snapshot is
//! released when the value is dropped.

pub mod memory;
pub mod redb_kv;

pub use memory::MemoryKv;
pub use redb_kv::RedbKv;

use crate::types::MemoryError;

/// A consistent point-in-time read view over the store.
///
/// Dropping the snapshot releases it; no explicit close call exists.
pub trait KvSnapshot {
    /// Collect all `(key, value)` pairs whose key starts with `prefix`,
    /// in lexicographic key order.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the underlying scan fails.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemoryError>;
}

/// Minimal key-value interface consumed by the upper layers.
///
/// Writes are atomic per key. Concurrent readers are always safe;
/// implementations serialize writers internally.
pub trait KvStore: Send + Sync {
    /// Store `value` under `key`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the write fails.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), MemoryError>;

    /// Fetch the value under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the read fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MemoryError>;

    /// Remove the value under `key`. Removing an absent key is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the delete fails.
    fn delete(&self, key: &[u8]) -> Result<(), MemoryError>;

    /// Open a consistent read snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the snapshot cannot be
    /// established.
    fn snapshot(&self) -> Result<Box<dyn KvSnapshot + '_>, MemoryError>;

    /// Prefix scan over a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the snapshot or scan fails.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MemoryError> {
        self.snapshot()?.scan_prefix(prefix)
    }
}
