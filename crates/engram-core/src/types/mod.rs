//! # Core Type Definitions
//!
//! This module contains the shared data model for the Engram memory core:
//! - Consolidation records (`RawAssertion`, `ContradictionEdge`, `CanonicalFact`)
//! - Retrieval records (`Document`, `ScoredDocument`, `RetrievalExplanation`)
//! - Extraction records (`Entity`, `Relation`, `Assertion`)
//! - Configuration (`ConsolidationConfig`, `RetrievalConfig`)
//! - Error types (`MemoryError`)
//!
//! ## Persistence Guarantees
//!
//! Every record in this module serializes to JSON with the exact field
//! names given here; these names are part of the persisted key/value
//! contract and must not change. Fact payloads are
//! `serde_json::Map<String, Value>`, which is BTreeMap-backed and therefore
//! encodes with sorted object keys: the canonical form that fact equality
//! and id hashing depend on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A fact payload: an ordered mapping from string keys to JSON values.
///
/// Two assertions carry the same fact iff the canonical JSON encodings of
/// their payloads are byte-equal. The consolidator treats the payload as
/// opaque beyond that comparison.
pub type Fact = serde_json::Map<String, Value>;

// =============================================================================
// CONSOLIDATION RECORDS
// =============================================================================

/// An immutable assertion event from a source.
///
/// Raw assertions are never modified or deleted once stored; newer
/// knowledge supersedes them through contradiction edges only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAssertion {
    /// Opaque 16-hex-char identifier. Filled at insertion time when empty.
    #[serde(default)]
    pub id: String,
    /// The factual claim.
    pub fact: Fact,
    /// Free-form origin name (e.g. `"linkedin"`).
    pub source: String,
    /// Source confidence in `[0, 1]`.
    pub confidence: f64,
    /// Seconds since the Unix epoch. Filled with the wall clock when zero.
    #[serde(default)]
    pub timestamp: i64,
}

impl RawAssertion {
    /// Create an assertion with no id and no timestamp; both are derived
    /// by the assertion log at insertion time.
    #[must_use]
    pub fn new(fact: Fact, source: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: String::new(),
            fact,
            source: source.into(),
            confidence,
            timestamp: 0,
        }
    }

    /// Set an explicit timestamp (seconds since epoch).
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set an explicit id, overriding the derived one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A supersession relation from one prior assertion to a newer one.
///
/// While an edge is active, the assertion named by `from` is excluded
/// from consolidation. Edges never affect the assertion named by `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContradictionEdge {
    /// Id of the superseded assertion.
    pub from: String,
    /// Id of the superseding assertion.
    pub to: String,
    /// Seconds since epoch, recorded when the edge was written.
    pub timestamp: i64,
}

/// The consolidated view of a fact, derived from all surviving assertions
/// that share its payload. Rewritten in place on every consolidation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFact {
    /// Deterministic id: SHA-256 prefix over the canonical encoding of
    /// `merged_fact`.
    pub id: String,
    /// Fact payload of the top-ranked contributor.
    pub merged_fact: Fact,
    /// Weighted-mean confidence over contributors.
    pub confidence: f64,
    /// Source names of contributors, in rank order (duplicates preserved).
    pub sources: Vec<String>,
    /// Minimum timestamp among contributors.
    pub valid_from: i64,
    /// Reserved for future temporal closure; currently never set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
}

/// Provenance summary for a canonical fact, as returned by
/// [`Consolidator::explain`](crate::Consolidator::explain).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// Number of contributing sources.
    pub evidence_count: usize,
    /// Contributing source names in rank order.
    pub sources: Vec<String>,
    /// Merged confidence.
    pub confidence: f64,
}

// =============================================================================
// RETRIEVAL RECORDS
// =============================================================================

/// A retrievable document.
///
/// The id is carried in the storage key, not the stored JSON; metadata
/// keys are held opaquely for pre-filter predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-assigned identifier (taken from the storage key on read).
    #[serde(skip)]
    pub id: String,
    /// The indexed body.
    pub text: String,
    /// Arbitrary metadata, carried opaquely.
    #[serde(flatten)]
    pub metadata: Fact,
}

impl Document {
    /// Create a document with empty metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Fact::new(),
        }
    }

    /// Attach a metadata key/value pair.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A document annotated with its combined retrieval score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    /// The retrieved document.
    #[serde(flatten)]
    pub document: Document,
    /// Combined RRF score, serialized under the reserved `_score` key.
    #[serde(rename = "_score")]
    pub score: f64,
}

/// Per-stream weights echoed back by retrieval explanations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Weight applied to the lexical (BM25) stream.
    pub lexical: f64,
    /// Weight applied to the semantic stream.
    pub semantic: f64,
}

/// Score breakdown for one query/document pair, as returned by
/// [`HybridRetriever::explain`](crate::HybridRetriever::explain).
///
/// The combined score is a single-document RRF: both streams contain only
/// the explained document, so both ranks are 1. The number is a weight
/// calibration diagnostic, not comparable to scores from a ranked
/// retrieval over a larger candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalExplanation {
    /// Raw BM25 score.
    pub lexical_score: f64,
    /// Raw semantic score.
    pub semantic_score: f64,
    /// Single-document RRF combination.
    pub combined_score: f64,
    /// The configured stream weights.
    pub weights: ScoreWeights,
}

// =============================================================================
// EXTRACTION RECORDS
// =============================================================================

/// A named entity compiled from extractor output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Deterministic id over `name:entity_type`.
    #[serde(default)]
    pub id: String,
    /// Entity name.
    pub name: String,
    /// Type classification.
    pub entity_type: String,
    /// Additional attributes.
    #[serde(default, skip_serializing_if = "Fact::is_empty")]
    pub properties: Fact,
    /// Extraction confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Source text reference.
    #[serde(default)]
    pub provenance: String,
    /// Seconds since epoch.
    #[serde(default)]
    pub timestamp: i64,
}

/// A typed relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Deterministic id over `from:relation_type:to`.
    #[serde(default)]
    pub id: String,
    /// Source entity name.
    pub from_entity: String,
    /// Relationship type.
    pub relation_type: String,
    /// Target entity name.
    pub to_entity: String,
    /// Relation attributes.
    #[serde(default, skip_serializing_if = "Fact::is_empty")]
    pub properties: Fact,
    /// Extraction confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Source text reference.
    #[serde(default)]
    pub provenance: String,
    /// Seconds since epoch.
    #[serde(default)]
    pub timestamp: i64,
}

/// A subject-predicate-object triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Deterministic id over `subject:predicate:object`.
    #[serde(default)]
    pub id: String,
    /// Subject entity.
    pub subject: String,
    /// Predicate or relation.
    pub predicate: String,
    /// Object value.
    pub object: String,
    /// Extraction confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Source text reference.
    #[serde(default)]
    pub provenance: String,
    /// Seconds since epoch.
    #[serde(default)]
    pub timestamp: i64,
}

/// All knowledge compiled from one extraction call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Validated entities.
    pub entities: Vec<Entity>,
    /// Validated relations.
    pub relations: Vec<Relation>,
    /// Validated assertions.
    pub assertions: Vec<Assertion>,
}

/// Validation rules applied while compiling extractor output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSchema {
    /// Allowed entity types; empty means any.
    pub entity_types: Vec<String>,
    /// Allowed relation types; empty means any.
    pub relation_types: Vec<String>,
    /// Minimum confidence; zero disables the check.
    pub min_confidence: f64,
    /// Require a non-empty provenance reference.
    pub require_provenance: bool,
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Consolidation behavior knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Fact similarity threshold in `[0, 1]`.
    ///
    /// Reserved for a future fuzzy-grouping mode; recorded but not
    /// consulted. Grouping is exact byte equality of the canonical fact
    /// encoding.
    pub similarity_threshold: f64,
    /// Enable time-based expiry of contradiction edges.
    pub use_temporal_updates: bool,
    /// Age in seconds after which an edge stops filtering (when
    /// `use_temporal_updates` is set).
    pub max_conflict_age: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            use_temporal_updates: true,
            max_conflict_age: 86_400,
        }
    }
}

/// Hybrid retrieval knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum results to return.
    pub limit: usize,
    /// Weight applied to the BM25 reciprocal-rank contribution.
    pub lexical_weight: f64,
    /// Weight applied to the semantic reciprocal-rank contribution.
    pub semantic_weight: f64,
    /// RRF constant `k`.
    pub rrf_constant: u32,
    /// Candidate expansion ratio for a future two-stage pass; recorded
    /// but not consulted.
    pub prefilter_ratio: f64,
    /// Toggle for the future two-stage pass; recorded but not consulted.
    pub use_prefiltering: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            lexical_weight: 0.3,
            semantic_weight: 0.7,
            rrf_constant: 60,
            prefilter_ratio: 3.0,
            use_prefiltering: true,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the Engram core.
///
/// Batch operations (snapshot scans, consolidation runs) are best-effort:
/// malformed individual records are skipped, not fatal. Single-key
/// operations fail fast with the error verbatim. No retries happen inside
/// the core.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A KV put/get/delete/scan/snapshot failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// JSON encoding of a caller-supplied value failed.
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// A looked-up record is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied input failed schema validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

// =============================================================================
// TESTS
// =============================================================================
