//! # Canonical Encoding Module
//!
//! Deterministic fact encoding and id derivation.
//!
//! Fact equality, assertion grouping, and every deterministic id in the
//! system are defined over one encoding: JSON with sorted object keys,
//! UTF-8, no insignificant whitespace. `serde_json`'s map type is
//! BTreeMap-backed, so object keys sort at every nesting level and two
//! logically equal facts built in different insertion orders encode to
//! the same bytes. Number formatting is `serde_json`'s, which is stable
//! for a given value.
//!
//! Ids are the first 16 hex characters of a SHA-256 digest:
//! - assertion id: digest over `canonical_json(fact) || source`
//! - canonical fact id: digest over `canonical_json(fact)`

use crate::types::{Fact, MemoryError};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Length of derived ids, in hex characters.
pub const ID_LEN: usize = 16;

/// Encode a fact payload in canonical form.
///
/// # Errors
///
/// Returns `MemoryError::EncodingError` if a value in the payload cannot
/// be serialized (e.g. a non-finite float).
pub fn canonical_json(fact: &Fact) -> Result<String, MemoryError> {
    serde_json::to_string(fact).map_err(|e| MemoryError::EncodingError(e.to_string()))
}

/// Derive a 16-hex-char id from arbitrary input bytes.
#[must_use]
pub fn short_hash(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    // 8 bytes render to the 16 hex chars we keep.
    digest[..ID_LEN / 2].iter().fold(
        String::with_capacity(ID_LEN),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}

/// Derive the deterministic id for a raw assertion.
///
/// # Errors
///
/// Returns `MemoryError::EncodingError` if the fact payload cannot be
/// canonically encoded.
pub fn assertion_id(fact: &Fact, source: &str) -> Result<String, MemoryError> {
    let mut input = canonical_json(fact)?;
    input.push_str(source);
    Ok(short_hash(&input))
}

/// Derive the deterministic id for a canonical fact.
///
/// # Errors
///
/// Returns `MemoryError::EncodingError` if the fact payload cannot be
/// canonically encoded.
pub fn canonical_fact_id(fact: &Fact) -> Result<String, MemoryError> {
    Ok(short_hash(&canonical_json(fact)?))
}

// =============================================================================
// TESTS
// =============================================================================
