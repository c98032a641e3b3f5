//! # Assertion Log Module
//!
//! Append-only storage of raw assertion events and contradiction edges.
//!
//! Key layout (shared with the consolidator):
//! ```text
//! consolidation:<ns>:assertion:<id>             -> RawAssertion JSON
//! consolidation:<ns>:contradiction:<from>:<to>  -> ContradictionEdge JSON
//! ```
//!
//! Raw assertions are never mutated or deleted here; supersession is
//! expressed exclusively through contradiction edges. Re-adding an
//! existing id overwrites the record; callers that need insert-once
//! semantics must pass distinct ids.

use crate::canonical;
use crate::storage::KvStore;
use crate::types::{ContradictionEdge, MemoryError, RawAssertion};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Current wall clock as seconds since the Unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

/// Durable store of raw assertions and contradiction edges for one
/// namespace.
#[derive(Debug)]
pub struct AssertionLog<S: KvStore> {
    store: Arc<S>,
    namespace: String,
}

impl<S: KvStore> AssertionLog<S> {
    /// Create a log handle over `store` scoped to `namespace`.
    #[must_use]
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// The namespace this log is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn assertion_key(&self, id: &str) -> Vec<u8> {
        format!("consolidation:{}:assertion:{}", self.namespace, id).into_bytes()
    }

    fn contradiction_key(&self, from: &str, to: &str) -> Vec<u8> {
        format!("consolidation:{}:contradiction:{}:{}", self.namespace, from, to).into_bytes()
    }

    pub(crate) fn assertion_prefix(&self) -> Vec<u8> {
        format!("consolidation:{}:assertion:", self.namespace).into_bytes()
    }

    pub(crate) fn contradiction_prefix(&self) -> Vec<u8> {
        format!("consolidation:{}:contradiction:", self.namespace).into_bytes()
    }

    /// Append a raw assertion and return its id.
    ///
    /// A missing id is derived deterministically from the fact payload
    /// and source; a zero timestamp is filled with the wall clock.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::EncodingError` if the fact payload cannot be
    /// serialized, or `MemoryError::StorageError` if the write fails.
    pub fn add(&self, assertion: &RawAssertion) -> Result<String, MemoryError> {
        let id = if assertion.id.is_empty() {
            canonical::assertion_id(&assertion.fact, &assertion.source)?
        } else {
            assertion.id.clone()
        };

        let timestamp = if assertion.timestamp == 0 {
            unix_now()
        } else {
            assertion.timestamp
        };

        let mut stored = assertion.clone();
        stored.id = id.clone();
        stored.timestamp = timestamp;

        let value =
            serde_json::to_vec(&stored).map_err(|e| MemoryError::EncodingError(e.to_string()))?;
        self.store.put(&self.assertion_key(&id), &value)?;

        Ok(id)
    }

    /// Append a raw assertion that supersedes earlier ones.
    ///
    /// The assertion is written first, then one contradiction edge per
    /// entry in `contradicts`. The operation is not transactional across
    /// those keys: if an edge write fails, the assertion (and any edges
    /// already written) remain. Edges are only consulted at consolidation
    /// time, so callers may simply retry.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::EncodingError` or `MemoryError::StorageError`
    /// from the first failing write.
    pub fn add_with_contradiction(
        &self,
        assertion: &RawAssertion,
        contradicts: &[String],
    ) -> Result<String, MemoryError> {
        let id = self.add(assertion)?;

        for contradicted in contradicts {
            let edge = ContradictionEdge {
                from: contradicted.clone(),
                to: id.clone(),
                timestamp: unix_now(),
            };
            let value =
                serde_json::to_vec(&edge).map_err(|e| MemoryError::EncodingError(e.to_string()))?;
            self.store.put(&self.contradiction_key(contradicted, &id), &value)?;
        }

        Ok(id)
    }

    /// All raw assertions in the namespace, from one snapshot.
    ///
    /// Records that fail to decode are skipped so that newer writers
    /// cannot brick older readers.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the snapshot scan fails.
    pub fn assertions(&self) -> Result<Vec<RawAssertion>, MemoryError> {
        let records = self.store.scan_prefix(&self.assertion_prefix())?;
        Ok(decode_assertions(records))
    }

    /// All contradiction edges in the namespace, from one snapshot.
    ///
    /// Undecodable edges are skipped, which downstream is equivalent to
    /// treating them as inactive.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the snapshot scan fails.
    pub fn contradictions(&self) -> Result<Vec<ContradictionEdge>, MemoryError> {
        let records = self.store.scan_prefix(&self.contradiction_prefix())?;
        Ok(decode_edges(records))
    }
}

/// Decode scanned assertion records, skipping any that fail.
pub(crate) fn decode_assertions(records: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<RawAssertion> {
    let mut assertions = Vec::with_capacity(records.len());
    for (key, value) in records {
        match serde_json::from_slice::<RawAssertion>(&value) {
            Ok(assertion) => assertions.push(assertion),
            Err(e) => {
                warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping undecodable assertion");
            }
        }
    }
    assertions
}

/// Decode scanned contradiction records, skipping any that fail.
pub(crate) fn decode_edges(records: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<ContradictionEdge> {
    let mut edges = Vec::with_capacity(records.len());
    for (key, value) in records {
        match serde_json::from_slice::<ContradictionEdge>(&value) {
            Ok(edge) => edges.push(edge),
            Err(e) => {
                warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping undecodable contradiction edge");
            }
        }
    }
    edges
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use crate::types::Fact;
    use serde_json::json;

    fn make_fact(key: &str, value: serde_json::Value) -> Fact {
        let mut fact = Fact::new();
        fact.insert(key.to_string(), value);
        fact
    }

    fn make_log() -> AssertionLog<MemoryKv> {
        AssertionLog::new(Arc::new(MemoryKv::new()), "test")
    }

    #[test]
    fn add_derives_id_and_timestamp() {
        let log = make_log();
        let assertion = RawAssertion::new(make_fact("k", json!("v")), "src", 0.9);

        let id = log.add(&assertion).expect("add");
        assert_eq!(id.len(), 16);

        let stored = log.assertions().expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert!(stored[0].timestamp > 0);
    }

    #[test]
    fn add_keeps_explicit_id_and_timestamp() {
        let log = make_log();
        let assertion = RawAssertion::new(make_fact("k", json!("v")), "src", 0.9)
            .with_id("deadbeefdeadbeef")
            .with_timestamp(1234);

        let id = log.add(&assertion).expect("add");
        assert_eq!(id, "deadbeefdeadbeef");

        let stored = log.assertions().expect("list");
        assert_eq!(stored[0].timestamp, 1234);
    }

    #[test]
    fn readding_same_id_overwrites() {
        let log = make_log();
        let first = RawAssertion::new(make_fact("k", json!("v")), "src", 0.5).with_timestamp(1);
        let second = RawAssertion::new(make_fact("k", json!("v")), "src", 0.8).with_timestamp(2);

        let id1 = log.add(&first).expect("add");
        let id2 = log.add(&second).expect("add");
        assert_eq!(id1, id2);

        let stored = log.assertions().expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].confidence, 0.8);
    }

    #[test]
    fn same_fact_different_source_gets_different_id() {
        let log = make_log();
        let fact = make_fact("k", json!("v"));
        let a = RawAssertion::new(fact.clone(), "one", 0.5);
        let b = RawAssertion::new(fact, "two", 0.5);

        let id_a = log.add(&a).expect("add");
        let id_b = log.add(&b).expect("add");
        assert_ne!(id_a, id_b);
        assert_eq!(log.assertions().expect("list").len(), 2);
    }

    #[test]
    fn add_with_contradiction_writes_edges() {
        let log = make_log();
        let old = RawAssertion::new(make_fact("age", json!(32)), "form", 0.8);
        let old_id = log.add(&old).expect("add");

        let new = RawAssertion::new(make_fact("age", json!(33)), "form", 0.95);
        let new_id = log
            .add_with_contradiction(&new, std::slice::from_ref(&old_id))
            .expect("add with contradiction");

        let edges = log.contradictions().expect("list edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, old_id);
        assert_eq!(edges[0].to, new_id);
        assert!(edges[0].timestamp > 0);
    }

    #[test]
    fn undecodable_records_are_skipped() {
        let store = Arc::new(MemoryKv::new());
        let log = AssertionLog::new(Arc::clone(&store), "test");

        log.add(&RawAssertion::new(make_fact("k", json!("v")), "src", 0.9))
            .expect("add");
        store
            .put(b"consolidation:test:assertion:garbage", b"not json")
            .expect("put");
        store
            .put(b"consolidation:test:contradiction:a:b", b"{broken")
            .expect("put");

        assert_eq!(log.assertions().expect("list").len(), 1);
        assert!(log.contradictions().expect("list").is_empty());
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = Arc::new(MemoryKv::new());
        let log_a = AssertionLog::new(Arc::clone(&store), "tenant_a");
        let log_b = AssertionLog::new(Arc::clone(&store), "tenant_b");

        log_a
            .add(&RawAssertion::new(make_fact("k", json!("v")), "src", 0.9))
            .expect("add");

        assert_eq!(log_a.assertions().expect("list").len(), 1);
        assert!(log_b.assertions().expect("list").is_empty());
    }
}
