//! # Semantic Cache Module
//!
//! Response cache keyed by embedding similarity rather than exact match,
//! for reusing expensive LLM outputs across near-duplicate queries.
//! Entries carry a TTL checked lazily on every scan; `purge_expired`
//! reclaims the space.
//!
//! Key layout:
//! ```text
//! cache:<name>:<key>  -> CacheEntry JSON
//! ```

use crate::log::unix_now;
use crate::storage::KvStore;
use crate::types::{Fact, MemoryError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// A cached response with its query embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-assigned cache key.
    pub key: String,
    /// The cached response body.
    pub value: String,
    /// Embedding of the query that produced the response.
    pub embedding: Vec<f32>,
    /// Seconds since epoch at insertion.
    pub timestamp: i64,
    /// Lifetime in seconds; zero means no expiry.
    #[serde(default)]
    pub ttl: i64,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "Fact::is_empty")]
    pub metadata: Fact,
}

impl CacheEntry {
    fn expired_at(&self, now: i64) -> bool {
        self.ttl > 0 && self.timestamp > 0 && now > self.timestamp + self.ttl
    }
}

/// A cache hit with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHit {
    /// The matched entry.
    #[serde(flatten)]
    pub entry: CacheEntry,
    /// Cosine similarity against the query embedding.
    pub score: f32,
}

/// Cache accounting since creation (or the last `clear`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live (unexpired) entries.
    pub count: usize,
    /// Lookups that returned a hit.
    pub hits: usize,
    /// Lookups that returned nothing.
    pub misses: usize,
    /// `hits / (hits + misses)`, zero before the first lookup.
    pub hit_rate: f64,
    /// Approximate bytes held by live entries (keys + values).
    pub memory_usage: usize,
}

/// Similarity-keyed response cache.
#[derive(Debug)]
pub struct SemanticCache<S: KvStore> {
    store: Arc<S>,
    name: String,
    hits: usize,
    misses: usize,
}

impl<S: KvStore> SemanticCache<S> {
    /// Create a cache handle named `name`.
    #[must_use]
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            hits: 0,
            misses: 0,
        }
    }

    fn entry_key(&self, key: &str) -> Vec<u8> {
        format!("cache:{}:{}", self.name, key).into_bytes()
    }

    fn prefix(&self) -> Vec<u8> {
        format!("cache:{}:", self.name).into_bytes()
    }

    /// Store a response under `key`.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::EncodingError` or `MemoryError::StorageError`
    /// if the entry cannot be written.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        embedding: Vec<f32>,
        ttl_seconds: i64,
        metadata: Fact,
    ) -> Result<(), MemoryError> {
        let entry = CacheEntry {
            key: key.into(),
            value: value.into(),
            embedding,
            timestamp: unix_now(),
            ttl: ttl_seconds,
            metadata,
        };

        let encoded =
            serde_json::to_vec(&entry).map_err(|e| MemoryError::EncodingError(e.to_string()))?;
        self.store.put(&self.entry_key(&entry.key), &encoded)
    }

    /// Find the best live entry above `threshold` for the query
    /// embedding, or `None`.
    ///
    /// Expired entries, undecodable records, and entries with a
    /// mismatched embedding dimension are skipped.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the scan fails.
    pub fn get(
        &mut self,
        query_embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<CacheHit>, MemoryError> {
        let now = unix_now();
        let mut best: Option<CacheHit> = None;
        let mut best_score = threshold;

        for (key, value) in self.store.scan_prefix(&self.prefix())? {
            let entry = match serde_json::from_slice::<CacheEntry>(&value) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping undecodable cache entry");
                    continue;
                }
            };
            if entry.expired_at(now) {
                continue;
            }
            let Some(score) = cosine_similarity(query_embedding, &entry.embedding) else {
                continue;
            };
            if score > best_score {
                best_score = score;
                best = Some(CacheHit { entry, score });
            }
        }

        if best.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        Ok(best)
    }

    /// Remove one entry.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the delete fails.
    pub fn delete(&self, key: &str) -> Result<(), MemoryError> {
        self.store.delete(&self.entry_key(key))
    }

    /// Remove every entry and reset the hit/miss counters. Returns the
    /// number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if a scan or delete fails;
    /// entries removed before the failure stay removed.
    pub fn clear(&mut self) -> Result<usize, MemoryError> {
        let keys: Vec<Vec<u8>> = self
            .store
            .scan_prefix(&self.prefix())?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut deleted = 0;
        for key in keys {
            self.store.delete(&key)?;
            deleted += 1;
        }

        self.hits = 0;
        self.misses = 0;
        Ok(deleted)
    }

    /// Remove expired entries. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if a scan or delete fails.
    pub fn purge_expired(&self) -> Result<usize, MemoryError> {
        let now = unix_now();
        let expired: Vec<Vec<u8>> = self
            .store
            .scan_prefix(&self.prefix())?
            .into_iter()
            .filter(|(_, value)| {
                serde_json::from_slice::<CacheEntry>(value)
                    .map(|entry| entry.expired_at(now))
                    .unwrap_or(false)
            })
            .map(|(key, _)| key)
            .collect();

        let mut purged = 0;
        for key in expired {
            self.store.delete(&key)?;
            purged += 1;
        }
        Ok(purged)
    }

    /// Current cache accounting. Live entries only; expired records are
    /// counted out even before a purge.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the scan fails.
    pub fn stats(&self) -> Result<CacheStats, MemoryError> {
        let now = unix_now();
        let mut count = 0;
        let mut memory_usage = 0;

        for (key, value) in self.store.scan_prefix(&self.prefix())? {
            let Ok(entry) = serde_json::from_slice::<CacheEntry>(&value) else {
                continue;
            };
            if entry.expired_at(now) {
                continue;
            }
            count += 1;
            memory_usage += key.len() + value.len();
        }

        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };

        Ok(CacheStats {
            count,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            memory_usage,
        })
    }
}

/// Cosine similarity between two embeddings, or `None` on a dimension
/// mismatch. Zero vectors score 0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

// =============================================================================
// TESTS
// =============================================================================
