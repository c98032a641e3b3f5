//! # BM25 Module
//!
//! Okapi BM25 over the in-memory index derived from the document store.
//!
//! The index is immutable once built; `index_documents` on the retriever
//! builds a fresh index and swaps it in whole. Statistics: per-term
//! document frequency, per-document token length, corpus size and average
//! length, plus the tokenized texts for on-demand scoring.

use crate::tokenize::tokenize;
use std::collections::{HashMap, HashSet};

/// Term-frequency saturation parameter.
pub const BM25_K1: f64 = 1.5;

/// Length-normalization parameter.
pub const BM25_B: f64 = 0.75;

/// An in-memory BM25 index over a fixed document set.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    k1: f64,
    b: f64,
    document_count: usize,
    avg_doc_length: f64,
    term_doc_freq: HashMap<String, usize>,
    doc_tokens: HashMap<String, Vec<String>>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::build(std::iter::empty())
    }
}

impl Bm25Index {
    /// Build an index over `(id, text)` pairs with the standard
    /// parameters (`k1 = 1.5`, `b = 0.75`).
    #[must_use]
    pub fn build(texts: impl IntoIterator<Item = (String, String)>) -> Self {
        Self::build_with_params(BM25_K1, BM25_B, texts)
    }

    /// Build an index with explicit parameters.
    #[must_use]
    pub fn build_with_params(
        k1: f64,
        b: f64,
        texts: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut term_doc_freq: HashMap<String, usize> = HashMap::new();
        let mut doc_tokens: HashMap<String, Vec<String>> = HashMap::new();
        let mut total_tokens = 0usize;

        for (id, text) in texts {
            let tokens = tokenize(&text);
            total_tokens += tokens.len();

            let unique: HashSet<&String> = tokens.iter().collect();
            for term in unique {
                *term_doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_tokens.insert(id, tokens);
        }

        let document_count = doc_tokens.len();
        let avg_doc_length = if document_count > 0 {
            total_tokens as f64 / document_count as f64
        } else {
            0.0
        };

        Self {
            k1,
            b,
            document_count,
            avg_doc_length,
            term_doc_freq,
            doc_tokens,
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.document_count
    }

    /// Average document length in tokens.
    #[must_use]
    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    /// Number of indexed documents containing `term`.
    #[must_use]
    pub fn document_frequency(&self, term: &str) -> usize {
        self.term_doc_freq.get(term).copied().unwrap_or(0)
    }

    /// BM25 score of `query` against the indexed document `doc_id`.
    ///
    /// Unknown documents score 0. Query terms absent from the corpus
    /// contribute 0, never negative infinity; the `+1` inside the IDF log
    /// keeps every contribution non-negative.
    #[must_use]
    pub fn score(&self, query: &str, doc_id: &str) -> f64 {
        let Some(doc_terms) = self.doc_tokens.get(doc_id) else {
            return 0.0;
        };

        let mut term_freqs: HashMap<&str, usize> = HashMap::new();
        for term in doc_terms {
            *term_freqs.entry(term.as_str()).or_insert(0) += 1;
        }

        let doc_length = doc_terms.len() as f64;
        let length_norm = if self.avg_doc_length > 0.0 {
            doc_length / self.avg_doc_length
        } else {
            0.0
        };

        let mut score = 0.0;
        for term in tokenize(query) {
            let df = self.document_frequency(&term) as f64;
            if df == 0.0 {
                continue;
            }
            let tf = term_freqs.get(term.as_str()).copied().unwrap_or(0) as f64;

            let idf =
                ((self.document_count as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
            let numerator = tf * (self.k1 + 1.0);
            let denominator = tf + self.k1 * (1.0 - self.b + self.b * length_norm);
            score += idf * (numerator / denominator);
        }

        score
    }
}

// =============================================================================
// TESTS
// =============================================================================
