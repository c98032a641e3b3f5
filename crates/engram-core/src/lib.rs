//! # engram-core
//!
//! An LLM-oriented memory core layered over an embedded key-value store.
//!
//! The crate does three tightly-coupled jobs:
//! - compile raw extraction output into typed, validated knowledge
//!   records (`extract`)
//! - maintain an event-sourced consolidation log that derives canonical
//!   facts from overlapping sources, with supersession and temporal
//!   invalidation (`log`, `consolidate`)
//! - answer queries with a hybrid lexical+semantic retriever fused via
//!   Reciprocal Rank Fusion (`retriever`)
//!
//! ## Architectural Constraints
//!
//! - Fully synchronous: all blocking is I/O on the KV store
//! - No global state; every handle carries its namespace
//! - Raw assertions are immutable; supersession only ever adds
//!   contradiction edges
//! - Every derived id is a deterministic function of canonical JSON
//!   (sorted object keys, UTF-8, no insignificant whitespace)

// =============================================================================
// MODULES
// =============================================================================

pub mod bm25;
pub mod cache;
pub mod canonical;
pub mod consolidate;
pub mod context;
pub mod extract;
pub mod filter;
pub mod log;
pub mod retriever;
pub mod semantic;
pub mod storage;
pub mod tokenize;
pub mod types;

// =============================================================================
// RE-EXPORTS: Data Model
// =============================================================================

pub use types::{
    Assertion, CanonicalFact, ConsolidationConfig, ContradictionEdge, Document, Entity,
    ExtractionResult, ExtractionSchema, Fact, MemoryError, Provenance, RawAssertion, Relation,
    RetrievalConfig, RetrievalExplanation, ScoreWeights, ScoredDocument,
};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use storage::{KvSnapshot, KvStore, MemoryKv, RedbKv};

// =============================================================================
// RE-EXPORTS: Consolidation
// =============================================================================

pub use consolidate::Consolidator;
pub use log::AssertionLog;

// =============================================================================
// RE-EXPORTS: Retrieval
// =============================================================================

pub use bm25::{Bm25Index, BM25_B, BM25_K1};
pub use filter::{AllAllowed, AllowedSet, IdAllowlist, NamespaceAllowed, PredicateAllowed};
pub use retriever::HybridRetriever;
pub use semantic::{SemanticScorer, TermFrequencyScorer};

// =============================================================================
// RE-EXPORTS: Extraction, Cache & Context Assembly
// =============================================================================

pub use cache::{CacheEntry, CacheHit, CacheStats, SemanticCache};
pub use context::{ContextBuilder, ContextFormat, ContextResult, TruncationStrategy};
pub use extract::ExtractionPipeline;
