//! # Consolidation Module
//!
//! Event-sourced derivation of canonical facts from the assertion log.
//!
//! Consolidation is a full recompute: every run reads all assertions and
//! contradiction edges from one snapshot, partitions assertions by the
//! canonical encoding of their fact payload, filters out assertions with
//! an active contradiction edge, and writes one canonical fact per
//! surviving group. Canonical ids are a pure function of the merged fact
//! payload, so regenerating the same fact overwrites the same key and
//! overlapping runs converge on equivalent values.
//!
//! Key layout:
//! ```text
//! consolidation:<ns>:canonical:<id>  -> CanonicalFact JSON
//! ```

use crate::canonical;
use crate::log::{self, AssertionLog};
use crate::storage::KvStore;
use crate::types::{
    CanonicalFact, ConsolidationConfig, ContradictionEdge, MemoryError, Provenance, RawAssertion,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Derives and maintains canonical facts for one namespace.
#[derive(Debug)]
pub struct Consolidator<S: KvStore> {
    log: AssertionLog<S>,
    config: ConsolidationConfig,
}

impl<S: KvStore> Consolidator<S> {
    /// Create a consolidator over `store` scoped to `namespace`.
    #[must_use]
    pub fn new(store: Arc<S>, namespace: impl Into<String>, config: ConsolidationConfig) -> Self {
        Self {
            log: AssertionLog::new(store, namespace),
            config,
        }
    }

    /// Create a consolidator with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self::new(store, namespace, ConsolidationConfig::default())
    }

    /// The underlying assertion log.
    #[must_use]
    pub fn log(&self) -> &AssertionLog<S> {
        &self.log
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    fn canonical_key(&self, id: &str) -> Vec<u8> {
        format!("consolidation:{}:canonical:{}", self.log.namespace(), id).into_bytes()
    }

    fn canonical_prefix(&self) -> Vec<u8> {
        format!("consolidation:{}:canonical:", self.log.namespace()).into_bytes()
    }

    /// Run consolidation against the current wall clock.
    ///
    /// Returns the number of canonical facts written (including
    /// overwrites of existing ids). Per-group encode or write failures
    /// are logged and skipped, so the count may be lower than the number
    /// of surviving groups.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the input snapshot cannot
    /// be read.
    pub fn consolidate(&self) -> Result<usize, MemoryError> {
        self.consolidate_at(log::unix_now())
    }

    /// Run consolidation with a fixed evaluation time.
    ///
    /// `now` anchors the contradiction-edge activity window; everything
    /// else is identical to [`consolidate`](Self::consolidate).
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the input snapshot cannot
    /// be read.
    pub fn consolidate_at(&self, now: i64) -> Result<usize, MemoryError> {
        // Both prefixes are read through one snapshot so assertions and
        // edges describe the same point in time.
        let (assertions, contradictions) = {
            let snapshot = self.log.store().snapshot()?;
            let assertions = log::decode_assertions(snapshot.scan_prefix(&self.log.assertion_prefix())?);
            let contradictions =
                log::decode_edges(snapshot.scan_prefix(&self.log.contradiction_prefix())?);
            (assertions, contradictions)
        };

        // Partition by the canonical fact encoding; byte equality is the
        // grouping rule, no similarity threshold applies.
        let mut groups: BTreeMap<String, Vec<RawAssertion>> = BTreeMap::new();
        for assertion in assertions {
            let Ok(group_key) = canonical::canonical_json(&assertion.fact) else {
                continue;
            };
            groups.entry(group_key).or_default().push(assertion);
        }

        let mut updated = 0;

        for group in groups.into_values() {
            let survivors = self.rank_and_filter(group, &contradictions, now);
            if survivors.is_empty() {
                continue;
            }

            let merged_fact = survivors[0].fact.clone();
            let id = match canonical::canonical_fact_id(&merged_fact) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "skipping group with unencodable fact");
                    continue;
                }
            };

            let canonical_fact = CanonicalFact {
                id: id.clone(),
                merged_fact,
                confidence: merge_confidence(&survivors),
                sources: survivors.iter().map(|a| a.source.clone()).collect(),
                valid_from: survivors
                    .iter()
                    .map(|a| a.timestamp)
                    .min()
                    .unwrap_or_default(),
                valid_until: None,
            };

            let value = match serde_json::to_vec(&canonical_fact) {
                Ok(value) => value,
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping unencodable canonical fact");
                    continue;
                }
            };
            if let Err(e) = self.log.store().put(&self.canonical_key(&id), &value) {
                warn!(id = %id, error = %e, "failed to write canonical fact");
                continue;
            }
            updated += 1;
        }

        Ok(updated)
    }

    /// Rank a group `(confidence desc, timestamp desc, id asc)` and drop
    /// every assertion with an active contradiction edge pointing away
    /// from it.
    fn rank_and_filter(
        &self,
        mut group: Vec<RawAssertion>,
        contradictions: &[ContradictionEdge],
        now: i64,
    ) -> Vec<RawAssertion> {
        group.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });

        group.retain(|assertion| {
            !contradictions
                .iter()
                .any(|edge| edge.from == assertion.id && self.edge_active(edge, now))
        });
        group
    }

    /// An edge filters its `from` assertion while active. With temporal
    /// updates enabled the edge expires once older than
    /// `max_conflict_age`; otherwise it never expires.
    fn edge_active(&self, edge: &ContradictionEdge, now: i64) -> bool {
        if self.config.use_temporal_updates {
            now.saturating_sub(edge.timestamp) <= self.config.max_conflict_age
        } else {
            true
        }
    }

    /// All canonical facts in the namespace, from one snapshot.
    /// Undecodable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the snapshot scan fails.
    pub fn canonical_facts(&self) -> Result<Vec<CanonicalFact>, MemoryError> {
        let records = self.log.store().scan_prefix(&self.canonical_prefix())?;

        let mut facts = Vec::with_capacity(records.len());
        for (key, value) in records {
            match serde_json::from_slice::<CanonicalFact>(&value) {
                Ok(fact) => facts.push(fact),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping undecodable canonical fact");
                }
            }
        }
        Ok(facts)
    }

    /// Provenance of a canonical fact.
    ///
    /// An absent record yields the zero sentinel (no sources, zero
    /// confidence), never an error.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the read fails, or
    /// `MemoryError::EncodingError` if a present record cannot be
    /// decoded.
    pub fn explain(&self, fact_id: &str) -> Result<Provenance, MemoryError> {
        let Some(value) = self.log.store().get(&self.canonical_key(fact_id))? else {
            return Ok(Provenance::default());
        };

        let fact: CanonicalFact = serde_json::from_slice(&value)
            .map_err(|e| MemoryError::EncodingError(e.to_string()))?;

        Ok(Provenance {
            evidence_count: fact.sources.len(),
            sources: fact.sources,
            confidence: fact.confidence,
        })
    }
}

/// Weighted-mean confidence over ranked contributors.
///
/// Weights decrease as `1/(i+1)`, so the top-ranked contributor
/// dominates while corroboration still lifts (or drags) the result.
fn merge_confidence(assertions: &[RawAssertion]) -> f64 {
    if assertions.is_empty() {
        return 0.0;
    }
    if assertions.len() == 1 {
        return assertions[0].confidence;
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (rank, assertion) in assertions.iter().enumerate() {
        let weight = 1.0 / (rank as f64 + 1.0);
        weighted_sum += assertion.confidence * weight;
        total_weight += weight;
    }
    weighted_sum / total_weight
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

    fn make_consolidator() -> Consolidator<MemoryKv> {
        Consolidator::with_defaults(Arc::new(MemoryKv::new()), "test")
    }

    fn assertion(fact: Fact, source: &str, confidence: f64, timestamp: i64) -> RawAssertion {
        RawAssertion::new(fact, source, confidence).with_timestamp(timestamp)
    }

    #[test]
    fn corroborating_sources_merge_into_one_canonical() {
        let consolidator = make_consolidator();
        let mut fact = Fact::new();
        fact.insert("subject".to_string(), json!("Alice"));
        fact.insert("claim".to_string(), json!("works at TechCorp"));

        consolidator
            .log()
            .add(&assertion(fact.clone(), "linkedin", 0.95, 100))
            .expect("add");
        consolidator
            .log()
            .add(&assertion(fact.clone(), "website", 0.90, 101))
            .expect("add");
        consolidator
            .log()
            .add(&assertion(fact.clone(), "github", 0.85, 102))
            .expect("add");

        let updated = consolidator.consolidate().expect("consolidate");
        assert_eq!(updated, 1);

        let facts = consolidator.canonical_facts().expect("facts");
        assert_eq!(facts.len(), 1);

        let canonical = &facts[0];
        let expected =
            (0.95 / 1.0 + 0.90 / 2.0 + 0.85 / 3.0) / (1.0 + 1.0 / 2.0 + 1.0 / 3.0);
        assert!((canonical.confidence - expected).abs() < 1e-9);
        assert_eq!(canonical.sources, vec!["linkedin", "website", "github"]);
        assert_eq!(canonical.valid_from, 100);
        assert_eq!(canonical.merged_fact, fact);
        assert!(canonical.valid_until.is_none());
    }

    #[test]
    fn single_contributor_keeps_its_confidence() {
        let consolidator = make_consolidator();
        consolidator
            .log()
            .add(&assertion(make_fact("k", json!("v")), "src", 0.7, 10))
            .expect("add");

        consolidator.consolidate().expect("consolidate");
        let facts = consolidator.canonical_facts().expect("facts");
        assert_eq!(facts[0].confidence, 0.7);
    }

    #[test]
    fn distinct_facts_form_distinct_groups() {
        let consolidator = make_consolidator();
        consolidator
            .log()
            .add(&assertion(make_fact("age", json!(32)), "a", 0.8, 1))
            .expect("add");
        consolidator
            .log()
            .add(&assertion(make_fact("age", json!(33)), "b", 0.9, 2))
            .expect("add");

        let updated = consolidator.consolidate().expect("consolidate");
        assert_eq!(updated, 2);
        assert_eq!(consolidator.canonical_facts().expect("facts").len(), 2);
    }

    #[test]
    fn canonical_id_is_stable_across_runs() {
        let consolidator = make_consolidator();
        consolidator
            .log()
            .add(&assertion(make_fact("k", json!("v")), "src", 0.9, 1))
            .expect("add");

        consolidator.consolidate().expect("run 1");
        let first = consolidator.canonical_facts().expect("facts");

        consolidator.consolidate().expect("run 2");
        let second = consolidator.canonical_facts().expect("facts");

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(
            first[0].id,
            canonical::canonical_fact_id(&first[0].merged_fact).expect("id")
        );
    }

    #[test]
    fn active_supersession_excludes_contributor() {
        // Scenario: a2 supersedes a1 inside the conflict window. The a1
        // group empties out, only a2 emits a canonical.
        let consolidator = make_consolidator();
        let a1 = consolidator
            .log()
            .add(&assertion(make_fact("age", json!(32)), "form", 0.80, 1000))
            .expect("add");
        consolidator
            .log()
            .add_with_contradiction(
                &assertion(make_fact("age", json!(33)), "form", 0.95, 1001),
                std::slice::from_ref(&a1),
            )
            .expect("add with contradiction");

        // Edge timestamps are wall-clock; evaluate shortly after.
        let now = log::unix_now() + 500;
        let updated = consolidator.consolidate_at(now).expect("consolidate");
        assert_eq!(updated, 1);

        let facts = consolidator.canonical_facts().expect("facts");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].confidence, 0.95);
        assert_eq!(facts[0].merged_fact, make_fact("age", json!(33)));
    }

    #[test]
    fn expired_supersession_restores_contributor() {
        // Same shape, evaluated past max_conflict_age: the edge has
        // expired and both facts emit canonicals.
        let consolidator = make_consolidator();
        let a1 = consolidator
            .log()
            .add(&assertion(make_fact("age", json!(32)), "form", 0.80, 1000))
            .expect("add");
        consolidator
            .log()
            .add_with_contradiction(
                &assertion(make_fact("age", json!(33)), "form", 0.95, 1001),
                std::slice::from_ref(&a1),
            )
            .expect("add with contradiction");

        let now = log::unix_now() + consolidator.config().max_conflict_age + 1000;
        let updated = consolidator.consolidate_at(now).expect("consolidate");
        assert_eq!(updated, 2);
    }

    #[test]
    fn edges_never_expire_without_temporal_updates() {
        let config = ConsolidationConfig {
            use_temporal_updates: false,
            ..ConsolidationConfig::default()
        };
        let consolidator = Consolidator::new(Arc::new(MemoryKv::new()), "test", config);

        let a1 = consolidator
            .log()
            .add(&assertion(make_fact("age", json!(32)), "form", 0.80, 1000))
            .expect("add");
        consolidator
            .log()
            .add_with_contradiction(
                &assertion(make_fact("age", json!(33)), "form", 0.95, 1001),
                std::slice::from_ref(&a1),
            )
            .expect("add with contradiction");

        // Far in the future the edge still filters.
        let now = log::unix_now() + 10 * 86_400;
        let updated = consolidator.consolidate_at(now).expect("consolidate");
        assert_eq!(updated, 1);
    }

    #[test]
    fn edge_only_affects_its_from_side() {
        // Both assertions carry the same fact, so they share a group;
        // the edge removes only the superseded contributor.
        let consolidator = make_consolidator();
        let fact = make_fact("k", json!("v"));
        let a1 = consolidator
            .log()
            .add(&assertion(fact.clone(), "stale", 0.8, 1))
            .expect("add");
        consolidator
            .log()
            .add_with_contradiction(
                &assertion(fact, "fresh", 0.9, 2),
                std::slice::from_ref(&a1),
            )
            .expect("add");

        consolidator
            .consolidate_at(log::unix_now())
            .expect("consolidate");
        let facts = consolidator.canonical_facts().expect("facts");

        // The superseding assertion survives even though it is the `to`
        // of an edge; only "stale" drops out of the group.
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].sources, vec!["fresh"]);
        assert_eq!(facts[0].confidence, 0.9);
    }

    #[test]
    fn ranking_orders_by_confidence_then_recency() {
        let consolidator = make_consolidator();
        let fact = make_fact("k", json!("v"));

        consolidator
            .log()
            .add(&assertion(fact.clone(), "low", 0.5, 300))
            .expect("add");
        consolidator
            .log()
            .add(&assertion(fact.clone(), "high", 0.9, 100))
            .expect("add");
        consolidator
            .log()
            .add(&assertion(fact.clone(), "mid", 0.7, 200))
            .expect("add");

        consolidator.consolidate().expect("consolidate");
        let facts = consolidator.canonical_facts().expect("facts");
        assert_eq!(facts[0].sources, vec!["high", "mid", "low"]);
        assert_eq!(facts[0].valid_from, 100);
    }

    #[test]
    fn explain_absent_fact_returns_sentinel() {
        let consolidator = make_consolidator();
        let provenance = consolidator.explain("0000000000000000").expect("explain");
        assert_eq!(provenance.evidence_count, 0);
        assert!(provenance.sources.is_empty());
        assert_eq!(provenance.confidence, 0.0);
    }

    #[test]
    fn explain_reports_stored_provenance() {
        let consolidator = make_consolidator();
        let fact = make_fact("k", json!("v"));
        consolidator
            .log()
            .add(&assertion(fact.clone(), "one", 0.9, 1))
            .expect("add");
        consolidator
            .log()
            .add(&assertion(fact.clone(), "two", 0.8, 2))
            .expect("add");
        consolidator.consolidate().expect("consolidate");

        let id = canonical::canonical_fact_id(&fact).expect("id");
        let provenance = consolidator.explain(&id).expect("explain");
        assert_eq!(provenance.evidence_count, 2);
        assert_eq!(provenance.sources, vec!["one", "two"]);
        assert!(provenance.confidence > 0.8);
    }

    #[test]
    fn fully_contradicted_group_emits_nothing() {
        let consolidator = make_consolidator();
        let a1 = consolidator
            .log()
            .add(&assertion(make_fact("k", json!("v")), "src", 0.8, 1))
            .expect("add");
        consolidator
            .log()
            .add_with_contradiction(
                &assertion(make_fact("other", json!("w")), "src", 0.9, 2),
                std::slice::from_ref(&a1),
            )
            .expect("add");

        consolidator
            .consolidate_at(log::unix_now())
            .expect("consolidate");

        let facts = consolidator.canonical_facts().expect("facts");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].merged_fact, make_fact("other", json!("w")));
    }

    #[test]
    fn merge_confidence_formula() {
        let contributors: Vec<RawAssertion> = [0.9, 0.6, 0.3]
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                assertion(make_fact("k", json!("v")), "src", c, i as i64)
            })
            .collect();

        let merged = merge_confidence(&contributors);
        let expected = (0.9 + 0.6 / 2.0 + 0.3 / 3.0) / (1.0 + 0.5 + 1.0 / 3.0);
        assert!((merged - expected).abs() < 1e-12);
    }

    #[test]
    fn merge_confidence_empty_is_zero() {
        assert_eq!(merge_confidence(&[]), 0.0);
    }
}
