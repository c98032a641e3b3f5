//! # Semantic Scoring Module
//!
//! The semantic half of hybrid retrieval, behind a capability trait so
//! the shipped term-frequency placeholder can be swapped for a dense
//! embedding backend without touching fusion, filtering, or storage.

use crate::tokenize::tokenize;
use std::collections::HashMap;

/// Scores the semantic affinity of a query against a document text.
///
/// Implementations return a value in `[-1, 1]`; higher means closer.
pub trait SemanticScorer: Send + Sync {
    /// Score `query` against `text`.
    fn score(&self, query: &str, text: &str) -> f64;
}

/// Placeholder scorer: cosine similarity between term-frequency vectors
/// over the shared token vocabulary.
///
/// Returns 0 when either side tokenizes to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermFrequencyScorer;

impl SemanticScorer for TermFrequencyScorer {
    fn score(&self, query: &str, text: &str) -> f64 {
        let query_terms = tokenize(query);
        let text_terms = tokenize(text);
        if query_terms.is_empty() || text_terms.is_empty() {
            return 0.0;
        }

        let query_freq = frequencies(&query_terms);
        let text_freq = frequencies(&text_terms);

        let dot: f64 = query_freq
            .iter()
            .filter_map(|(term, &qf)| text_freq.get(term).map(|&tf| (qf * tf) as f64))
            .sum();

        let query_mag = magnitude(&query_freq);
        let text_mag = magnitude(&text_freq);
        if query_mag == 0.0 || text_mag == 0.0 {
            return 0.0;
        }

        dot / (query_mag * text_mag)
    }
}

fn frequencies(terms: &[String]) -> HashMap<&str, usize> {
    let mut freq = HashMap::new();
    for term in terms {
        *freq.entry(term.as_str()).or_insert(0) += 1;
    }
    freq
}

fn magnitude(freq: &HashMap<&str, usize>) -> f64 {
    freq.values()
        .map(|&count| (count * count) as f64)
        .sum::<f64>()
        .sqrt()
}

// =============================================================================
// TESTS
// =============================================================================
