//! # Context Assembly Module
//!
//! Token-budgeted assembly of LLM prompt context from prioritized
//! sections. Pure computation: nothing here touches storage.
//!
//! Sections are ordered by priority (lower number wins), the total is
//! measured against the budget with a ~4-chars-per-token estimate, and
//! one of three truncation strategies reconciles overruns before the
//! result is rendered in the configured output format.

use crate::types::MemoryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output rendering for assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFormat {
    /// `[name]` headers with raw section bodies.
    #[default]
    Sections,
    /// A JSON object mapping section names to bodies.
    Json,
    /// Markdown with `##` headers.
    Markdown,
}

/// How an over-budget context is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// Drop whole sections from the low-priority end.
    #[default]
    TailDrop,
    /// Drop whole sections from the high-priority end.
    HeadDrop,
    /// Shrink every section's body by the same factor.
    Proportional,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    priority: i32,
    content: String,
    token_count: usize,
}

/// Per-section accounting in a built context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSection {
    /// Section name.
    pub name: String,
    /// Estimated tokens contributed.
    pub token_count: usize,
    /// Whether this section's body was cut (proportional strategy only).
    pub truncated: bool,
}

/// An assembled context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextResult {
    /// The rendered context.
    pub text: String,
    /// Estimated total tokens after truncation.
    pub token_count: usize,
    /// Sections included, in output order.
    pub sections: Vec<ContextSection>,
    /// Whether any truncation was applied.
    pub truncated: bool,
}

/// Builder for token-budgeted context assembly.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    session_id: String,
    token_budget: usize,
    format: ContextFormat,
    truncation: TruncationStrategy,
    sections: Vec<Section>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            token_budget: 4096,
            format: ContextFormat::default(),
            truncation: TruncationStrategy::default(),
            sections: Vec::new(),
        }
    }
}

impl ContextBuilder {
    /// Create a builder with a 4096-token budget, sectioned output, and
    /// tail-drop truncation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag the context with a session id.
    #[must_use]
    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// The session id, if one was set.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Set the token budget.
    #[must_use]
    pub fn with_budget(mut self, tokens: usize) -> Self {
        self.token_budget = tokens;
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: ContextFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the truncation strategy.
    #[must_use]
    pub fn with_truncation(mut self, strategy: TruncationStrategy) -> Self {
        self.truncation = strategy;
        self
    }

    /// Add a literal text section. Lower priority numbers are kept
    /// first when the budget forces cuts.
    #[must_use]
    pub fn literal(
        mut self,
        name: impl Into<String>,
        priority: i32,
        text: impl Into<String>,
    ) -> Self {
        let content = text.into();
        let token_count = estimate_tokens(&content);
        self.sections.push(Section {
            name: name.into(),
            priority,
            content,
            token_count,
        });
        self
    }

    /// Assemble the context.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::EncodingError` if JSON rendering fails.
    pub fn build(&self) -> Result<ContextResult, MemoryError> {
        let mut ordered = self.sections.clone();
        // Stable sort: equal priorities keep insertion order.
        ordered.sort_by_key(|section| section.priority);

        let total: usize = ordered.iter().map(|s| s.token_count).sum();
        let truncated = total > self.token_budget;
        let (kept, cut_bodies) = if truncated {
            self.apply_truncation(ordered)
        } else {
            (ordered, false)
        };

        let text = self.render(&kept)?;

        let sections = kept
            .iter()
            .map(|section| ContextSection {
                name: section.name.clone(),
                token_count: section.token_count,
                truncated: cut_bodies,
            })
            .collect();
        let token_count = kept.iter().map(|s| s.token_count).sum();

        Ok(ContextResult {
            text,
            token_count,
            sections,
            truncated,
        })
    }

    /// Returns the surviving sections and whether their bodies were cut
    /// (as opposed to whole sections being dropped).
    fn apply_truncation(&self, sections: Vec<Section>) -> (Vec<Section>, bool) {
        match self.truncation {
            TruncationStrategy::TailDrop => (self.tail_drop(sections), false),
            TruncationStrategy::HeadDrop => (self.head_drop(sections), false),
            TruncationStrategy::Proportional => (self.proportional(sections), true),
        }
    }

    fn tail_drop(&self, sections: Vec<Section>) -> Vec<Section> {
        let mut kept = Vec::new();
        let mut used = 0;
        for section in sections {
            if used + section.token_count > self.token_budget {
                break;
            }
            used += section.token_count;
            kept.push(section);
        }
        kept
    }

    fn head_drop(&self, sections: Vec<Section>) -> Vec<Section> {
        let total: usize = sections.iter().map(|s| s.token_count).sum();
        let to_drop = total.saturating_sub(self.token_budget);

        let mut kept = Vec::new();
        let mut dropped = 0;
        for section in sections {
            if dropped + section.token_count <= to_drop {
                dropped += section.token_count;
            } else {
                kept.push(section);
            }
        }
        kept
    }

    fn proportional(&self, sections: Vec<Section>) -> Vec<Section> {
        let total: usize = sections.iter().map(|s| s.token_count).sum();
        if total <= self.token_budget || total == 0 {
            return sections;
        }

        let factor = self.token_budget as f64 / total as f64;
        sections
            .into_iter()
            .map(|section| {
                let token_count = ((section.token_count as f64 * factor) as usize).max(1);
                let target = (section.content.len() as f64 * factor) as usize;
                let mut cut = target.min(section.content.len());
                while !section.content.is_char_boundary(cut) {
                    cut -= 1;
                }
                Section {
                    content: section.content[..cut].to_string(),
                    token_count,
                    ..section
                }
            })
            .collect()
    }

    fn render(&self, sections: &[Section]) -> Result<String, MemoryError> {
        match self.format {
            ContextFormat::Sections => {
                let mut out = String::new();
                for section in sections {
                    out.push('[');
                    out.push_str(&section.name);
                    out.push_str("]\n");
                    out.push_str(&section.content);
                    out.push_str("\n\n");
                }
                Ok(out.trim().to_string())
            }
            ContextFormat::Json => {
                let map: BTreeMap<&str, &str> = sections
                    .iter()
                    .map(|s| (s.name.as_str(), s.content.as_str()))
                    .collect();
                serde_json::to_string(&map).map_err(|e| MemoryError::EncodingError(e.to_string()))
            }
            ContextFormat::Markdown => {
                let mut out = String::new();
                for section in sections {
                    out.push_str("## ");
                    out.push_str(&section.name);
                    out.push_str("\n\n");
                    out.push_str(&section.content);
                    out.push_str("\n\n");
                }
                Ok(out.trim().to_string())
            }
        }
    }
}

/// Rough token estimate: ~4 characters per token of English text.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_render_in_priority_order() {
        let result = ContextBuilder::new()
            .literal("facts", 2, "Alice works at TechCorp.")
            .literal("system", 1, "You are a helpful assistant.")
            .build()
            .expect("build");

        assert!(!result.truncated);
        let system_pos = result.text.find("[system]").expect("system section");
        let facts_pos = result.text.find("[facts]").expect("facts section");
        assert!(system_pos < facts_pos);
    }

    #[test]
    fn under_budget_keeps_everything() {
        let result = ContextBuilder::new()
            .with_budget(1000)
            .literal("a", 1, "short")
            .literal("b", 2, "also short")
            .build()
            .expect("build");

        assert_eq!(result.sections.len(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn tail_drop_cuts_low_priority_sections() {
        // 100 chars -> 25 tokens each; budget fits only the first.
        let body = "x".repeat(100);
        let result = ContextBuilder::new()
            .with_budget(30)
            .literal("keep", 1, body.clone())
            .literal("drop", 2, body)
            .build()
            .expect("build");

        assert!(result.truncated);
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].name, "keep");
        assert!(result.token_count <= 30);
    }

    #[test]
    fn head_drop_cuts_high_priority_sections() {
        // 28 + 25 tokens against a 25-token budget: exactly the first
        // section's worth must go.
        let result = ContextBuilder::new()
            .with_budget(25)
            .with_truncation(TruncationStrategy::HeadDrop)
            .literal("drop", 1, "x".repeat(112))
            .literal("keep", 2, "x".repeat(100))
            .build()
            .expect("build");

        assert!(result.truncated);
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].name, "keep");
    }

    #[test]
    fn proportional_shrinks_all_sections() {
        let body = "x".repeat(200);
        let result = ContextBuilder::new()
            .with_budget(50)
            .with_truncation(TruncationStrategy::Proportional)
            .literal("a", 1, body.clone())
            .literal("b", 2, body)
            .build()
            .expect("build");

        assert!(result.truncated);
        assert_eq!(result.sections.len(), 2);
        assert!(result.sections.iter().all(|s| s.truncated));
        // 100 tokens scaled to a 50-token budget.
        assert!(result.token_count <= 50);
    }

    #[test]
    fn proportional_respects_char_boundaries() {
        // Multi-byte content must not be split mid-character.
        let body = "日本語のテキスト".repeat(20);
        let result = ContextBuilder::new()
            .with_budget(10)
            .with_truncation(TruncationStrategy::Proportional)
            .literal("a", 1, body)
            .build()
            .expect("build");
        assert!(result.truncated);
    }

    #[test]
    fn json_format_maps_names_to_bodies() {
        let result = ContextBuilder::new()
            .with_format(ContextFormat::Json)
            .literal("facts", 1, "Alice works here")
            .build()
            .expect("build");

        let value: serde_json::Value = serde_json::from_str(&result.text).expect("valid json");
        assert_eq!(value["facts"], "Alice works here");
    }

    #[test]
    fn markdown_format_uses_headers() {
        let result = ContextBuilder::new()
            .with_format(ContextFormat::Markdown)
            .literal("facts", 1, "Alice works here")
            .build()
            .expect("build");

        assert!(result.text.starts_with("## facts"));
        assert!(result.text.contains("Alice works here"));
    }

    #[test]
    fn session_id_is_carried() {
        let builder = ContextBuilder::new().for_session("session-42");
        assert_eq!(builder.session_id(), "session-42");
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let result = ContextBuilder::new()
            .literal("first", 1, "one")
            .literal("second", 1, "two")
            .build()
            .expect("build");

        assert_eq!(result.sections[0].name, "first");
        assert_eq!(result.sections[1].name, "second");
    }
}
