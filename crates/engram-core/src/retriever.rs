//! # Hybrid Retrieval Module
//!
//! Document store plus the lexical/semantic retrieval pipeline:
//! snapshot-scan the namespace, apply the allowed-set pre-filter, score
//! survivors with BM25 and the semantic scorer, fuse the two rankings
//! with Reciprocal Rank Fusion, truncate to the configured limit.
//!
//! Key layout:
//! ```text
//! retrieval:<ns>:doc:<id>  -> Document JSON
//! ```
//!
//! The BM25 index is derived state held in memory behind an `RwLock`:
//! `index_documents` builds a fresh index and swaps it in whole under
//! the write lock, readers score under the read lock, so a reader sees
//! either the old or the new index in its entirety. After a process
//! restart the index is empty until the next `index_documents` call.

use crate::bm25::Bm25Index;
use crate::filter::AllowedSet;
use crate::semantic::{SemanticScorer, TermFrequencyScorer};
use crate::storage::KvStore;
use crate::types::{
    Document, MemoryError, RetrievalConfig, RetrievalExplanation, ScoreWeights, ScoredDocument,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Hybrid lexical+semantic retriever for one namespace.
pub struct HybridRetriever<S: KvStore> {
    store: Arc<S>,
    namespace: String,
    config: RetrievalConfig,
    index: RwLock<Bm25Index>,
    semantic: Box<dyn SemanticScorer>,
}

impl<S: KvStore> std::fmt::Debug for HybridRetriever<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: KvStore> HybridRetriever<S> {
    /// Create a retriever with the term-frequency semantic placeholder.
    #[must_use]
    pub fn new(store: Arc<S>, namespace: impl Into<String>, config: RetrievalConfig) -> Self {
        Self::with_scorer(store, namespace, config, Box::new(TermFrequencyScorer))
    }

    /// Create a retriever with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self::new(store, namespace, RetrievalConfig::default())
    }

    /// Create a retriever with a caller-supplied semantic backend.
    #[must_use]
    pub fn with_scorer(
        store: Arc<S>,
        namespace: impl Into<String>,
        config: RetrievalConfig,
        semantic: Box<dyn SemanticScorer>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            config,
            index: RwLock::new(Bm25Index::default()),
            semantic,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            lexical: self.config.lexical_weight,
            semantic: self.config.semantic_weight,
        }
    }

    fn doc_key(&self, id: &str) -> Vec<u8> {
        format!("retrieval:{}:doc:{}", self.namespace, id).into_bytes()
    }

    fn doc_prefix(&self) -> Vec<u8> {
        format!("retrieval:{}:doc:", self.namespace).into_bytes()
    }

    /// Store documents and rebuild the BM25 index in full.
    ///
    /// Document writes land first; the index is then rebuilt from every
    /// document currently persisted in the namespace (not just this
    /// batch) and swapped in atomically, so index statistics always
    /// describe the full document set once this call returns.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::EncodingError` if a document cannot be
    /// serialized, or `MemoryError::StorageError` on write/scan failure.
    pub fn index_documents(&self, documents: &[Document]) -> Result<(), MemoryError> {
        for document in documents {
            let value = serde_json::to_vec(document)
                .map_err(|e| MemoryError::EncodingError(e.to_string()))?;
            self.store.put(&self.doc_key(&document.id), &value)?;
        }

        let all = self.all_documents()?;
        let index = Bm25Index::build(all.into_iter().map(|doc| (doc.id, doc.text)));

        let mut guard = self
            .index
            .write()
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        *guard = index;
        Ok(())
    }

    /// Fetch one document by id.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::NotFound` if the document is absent,
    /// `MemoryError::EncodingError` if it cannot be decoded, or
    /// `MemoryError::StorageError` on read failure.
    pub fn get_document(&self, id: &str) -> Result<Document, MemoryError> {
        let Some(value) = self.store.get(&self.doc_key(id))? else {
            return Err(MemoryError::NotFound(format!("document {id}")));
        };
        let mut document: Document = serde_json::from_slice(&value)
            .map_err(|e| MemoryError::EncodingError(e.to_string()))?;
        document.id = id.to_string();
        Ok(document)
    }

    /// Snapshot-scan every document in the namespace. Undecodable
    /// records are skipped.
    fn all_documents(&self) -> Result<Vec<Document>, MemoryError> {
        let prefix = self.doc_prefix();
        let records = self.store.scan_prefix(&prefix)?;

        let mut documents = Vec::with_capacity(records.len());
        for (key, value) in records {
            let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            match serde_json::from_slice::<Document>(&value) {
                Ok(mut document) => {
                    document.id = id;
                    documents.push(document);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping undecodable document");
                }
            }
        }
        Ok(documents)
    }

    /// Retrieve the best documents for `query` among those the allowed
    /// set admits.
    ///
    /// Results carry their combined RRF score and are sorted by it,
    /// truncated to the configured limit. An empty candidate pool yields
    /// an empty result, not an error.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the document scan fails.
    pub fn retrieve(
        &self,
        query: &str,
        allowed: &dyn AllowedSet,
    ) -> Result<Vec<ScoredDocument>, MemoryError> {
        let documents = self.all_documents()?;

        let filtered: Vec<Document> = documents
            .into_iter()
            .filter(|doc| allowed.is_allowed(&doc.id, &doc.metadata))
            .collect();
        if filtered.is_empty() {
            return Ok(Vec::new());
        }

        let mut lexical = HashMap::with_capacity(filtered.len());
        let mut semantic = HashMap::with_capacity(filtered.len());
        {
            let index = self
                .index
                .read()
                .map_err(|e| MemoryError::StorageError(e.to_string()))?;
            for doc in &filtered {
                lexical.insert(doc.id.clone(), index.score(query, &doc.id));
                semantic.insert(doc.id.clone(), self.semantic.score(query, &doc.text));
            }
        }

        let combined =
            reciprocal_rank_fusion(&lexical, &semantic, self.weights(), self.config.rrf_constant);

        let mut scored: Vec<ScoredDocument> = filtered
            .into_iter()
            .map(|document| {
                let score = combined.get(&document.id).copied().unwrap_or(0.0);
                ScoredDocument { document, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        scored.truncate(self.config.limit);
        Ok(scored)
    }

    /// Score breakdown for one query/document pair.
    ///
    /// The combined score is a single-document RRF: both streams contain
    /// only this document, both ranks are 1, and the result is
    /// `lexical_weight/(k+1) + semantic_weight/(k+1)`. Useful for weight
    /// calibration, not for comparing against ranked retrieval scores.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::NotFound` if the document is absent.
    pub fn explain(&self, query: &str, doc_id: &str) -> Result<RetrievalExplanation, MemoryError> {
        let document = self.get_document(doc_id)?;

        let lexical_score = {
            let index = self
                .index
                .read()
                .map_err(|e| MemoryError::StorageError(e.to_string()))?;
            index.score(query, doc_id)
        };
        let semantic_score = self.semantic.score(query, &document.text);

        let lexical = HashMap::from([(doc_id.to_string(), lexical_score)]);
        let semantic = HashMap::from([(doc_id.to_string(), semantic_score)]);
        let combined =
            reciprocal_rank_fusion(&lexical, &semantic, self.weights(), self.config.rrf_constant);

        Ok(RetrievalExplanation {
            lexical_score,
            semantic_score,
            combined_score: combined.get(doc_id).copied().unwrap_or(0.0),
            weights: self.weights(),
        })
    }
}

/// Rank ids by score, descending; ranks are 1-based. Ties break by id
/// ascending so repeated runs order identically.
#[must_use]
pub fn rank_scores(scores: &HashMap<String, f64>) -> HashMap<String, usize> {
    let mut sorted: Vec<(&String, f64)> = scores.iter().map(|(id, &s)| (id, s)).collect();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    sorted
        .into_iter()
        .enumerate()
        .map(|(position, (id, _))| (id.clone(), position + 1))
        .collect()
}

/// Reciprocal Rank Fusion over two score streams.
///
/// Each stream is ranked independently; an id's combined score is
/// `weights.lexical / (k + rank_lexical) + weights.semantic /
/// (k + rank_semantic)`. The weights scale the reciprocal-rank
/// contributions, not the raw scores, which keeps the fusion robust to
/// scale differences between the streams. Ids absent from a stream take
/// one past that stream's worst rank.
#[must_use]
pub fn reciprocal_rank_fusion(
    lexical: &HashMap<String, f64>,
    semantic: &HashMap<String, f64>,
    weights: ScoreWeights,
    k: u32,
) -> HashMap<String, f64> {
    let lexical_ranks = rank_scores(lexical);
    let semantic_ranks = rank_scores(semantic);
    let k = f64::from(k);

    let lexical_floor = lexical.len() + 1;
    let semantic_floor = semantic.len() + 1;

    let mut ids: HashSet<&String> = lexical.keys().collect();
    ids.extend(semantic.keys());

    ids.into_iter()
        .map(|id| {
            let lexical_rank = lexical_ranks.get(id).copied().unwrap_or(lexical_floor);
            let semantic_rank = semantic_ranks.get(id).copied().unwrap_or(semantic_floor);
            let score = weights.lexical / (k + lexical_rank as f64)
                + weights.semantic / (k + semantic_rank as f64);
            (id.clone(), score)
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
