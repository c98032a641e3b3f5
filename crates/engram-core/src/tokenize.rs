//! # Tokenizer Module
//!
//! The deterministic, pure-text tokenizer shared by the BM25 scorer and
//! the term-frequency semantic scorer: lower-case, split on ASCII
//! whitespace, strip surrounding punctuation, drop empty tokens. No
//! stemming, no stopword list.

/// Punctuation stripped from the head and tail of each token.
const STRIP_CHARS: &[char] = &[
    '.', ',', '!', '?', ';', ':', '(', ')', '[', ']', '{', '}', '"', '\'',
];

/// Tokenize text into scoring terms.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_ascii_whitespace()
        .filter_map(|term| {
            let trimmed = term.trim_matches(STRIP_CHARS);
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
