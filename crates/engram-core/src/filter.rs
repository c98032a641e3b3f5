//! # Pre-filter Module
//!
//! The allowed-set capability applied before scoring: a predicate over
//! `(doc_id, metadata)` that restricts the retrieval candidate pool.
//! Four realizations ship with the core; new variants add by
//! implementing the trait.

use crate::types::Fact;
use std::collections::HashSet;

/// Decides whether a document may enter the candidate pool.
pub trait AllowedSet {
    /// Return `true` if the document should be considered for retrieval.
    fn is_allowed(&self, id: &str, metadata: &Fact) -> bool;
}

/// Pass-through filter: every document is allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllAllowed;

impl AllowedSet for AllAllowed {
    fn is_allowed(&self, _id: &str, _metadata: &Fact) -> bool {
        true
    }
}

/// Whitelist filter with constant-time membership over document ids.
#[derive(Debug, Clone)]
pub struct IdAllowlist {
    ids: HashSet<String>,
}

impl IdAllowlist {
    /// Build a whitelist from the given ids.
    #[must_use]
    pub fn new<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl AllowedSet for IdAllowlist {
    fn is_allowed(&self, id: &str, _metadata: &Fact) -> bool {
        self.ids.contains(id)
    }
}

/// Namespace filter: allows ids of the form `<ns>_...` or `<ns>:...`.
#[derive(Debug, Clone)]
pub struct NamespaceAllowed {
    namespace: String,
}

impl NamespaceAllowed {
    /// Build a filter for the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl AllowedSet for NamespaceAllowed {
    fn is_allowed(&self, id: &str, _metadata: &Fact) -> bool {
        id.strip_prefix(&self.namespace)
            .is_some_and(|rest| rest.starts_with('_') || rest.starts_with(':'))
    }
}

/// Caller-supplied predicate filter.
pub struct PredicateAllowed<F>
where
    F: Fn(&str, &Fact) -> bool,
{
    predicate: F,
}

impl<F> PredicateAllowed<F>
where
    F: Fn(&str, &Fact) -> bool,
{
    /// Wrap a predicate closure.
    #[must_use]
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> AllowedSet for PredicateAllowed<F>
where
    F: Fn(&str, &Fact) -> bool,
{
    fn is_allowed(&self, id: &str, metadata: &Fact) -> bool {
        (self.predicate)(id, metadata)
    }
}

// =============================================================================
// TESTS
// =============================================================================
