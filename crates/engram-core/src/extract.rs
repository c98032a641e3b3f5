//! # Extraction Module
//!
//! Compiles raw extractor output into typed, validated knowledge
//! records. The extractor itself is caller-supplied (typically an LLM
//! call); this pipeline is the deterministic half: shape checking,
//! schema validation, id derivation, and persistence.
//!
//! Key layout:
//! ```text
//! memory:<ns>:entity:<id>     -> Entity JSON
//! memory:<ns>:relation:<id>   -> Relation JSON
//! memory:<ns>:assertion:<id>  -> Assertion JSON
//! ```

use crate::canonical::short_hash;
use crate::log::unix_now;
use crate::storage::KvStore;
use crate::types::{
    Assertion, Entity, ExtractionResult, ExtractionSchema, Fact, MemoryError, Relation,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Longest provenance excerpt carried on extracted records.
const PROVENANCE_LEN: usize = 100;

/// Compiles extractor output into validated records for one namespace.
#[derive(Debug)]
pub struct ExtractionPipeline<S: KvStore> {
    store: Arc<S>,
    namespace: String,
    schema: Option<ExtractionSchema>,
}

impl<S: KvStore> ExtractionPipeline<S> {
    /// Create a pipeline. A `None` schema accepts everything.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        namespace: impl Into<String>,
        schema: Option<ExtractionSchema>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            schema,
        }
    }

    fn key(&self, kind: &str, id: &str) -> Vec<u8> {
        format!("memory:{}:{}:{}", self.namespace, kind, id).into_bytes()
    }

    fn prefix(&self, kind: &str) -> Vec<u8> {
        format!("memory:{}:{}:", self.namespace, kind).into_bytes()
    }

    /// Run the extractor over `text` and compile its output.
    ///
    /// Records that fail shape or schema validation are dropped, not
    /// fatal; nothing is persisted (see [`commit`](Self::commit)).
    ///
    /// # Errors
    ///
    /// Propagates the extractor's own error verbatim.
    pub fn extract<F>(&self, text: &str, extractor: F) -> Result<ExtractionResult, MemoryError>
    where
        F: Fn(&str) -> Result<Value, MemoryError>,
    {
        let raw = extractor(text)?;
        let timestamp = unix_now();
        let provenance: String = text.chars().take(PROVENANCE_LEN).collect();

        let mut result = ExtractionResult::default();

        for obj in array_of_objects(&raw, "entities") {
            let name = str_field(obj, "name");
            let entity_type = str_field(obj, "entity_type");
            let entity = Entity {
                id: short_hash(&format!("{name}:{entity_type}")),
                name,
                entity_type,
                properties: map_field(obj, "properties"),
                confidence: confidence_field(obj),
                provenance: provenance.clone(),
                timestamp,
            };
            if self.validate_entity(&entity) {
                result.entities.push(entity);
            }
        }

        for obj in array_of_objects(&raw, "relations") {
            let from_entity = str_field(obj, "from_entity");
            let relation_type = str_field(obj, "relation_type");
            let to_entity = str_field(obj, "to_entity");
            let relation = Relation {
                id: short_hash(&format!("{from_entity}:{relation_type}:{to_entity}")),
                from_entity,
                relation_type,
                to_entity,
                properties: map_field(obj, "properties"),
                confidence: confidence_field(obj),
                provenance: provenance.clone(),
                timestamp,
            };
            if self.validate_relation(&relation) {
                result.relations.push(relation);
            }
        }

        for obj in array_of_objects(&raw, "assertions") {
            let subject = str_field(obj, "subject");
            let predicate = str_field(obj, "predicate");
            let object = str_field(obj, "object");
            let assertion = Assertion {
                id: short_hash(&format!("{subject}:{predicate}:{object}")),
                subject,
                predicate,
                object,
                confidence: confidence_field(obj),
                provenance: provenance.clone(),
                timestamp,
            };
            if self.validate_assertion(&assertion) {
                result.assertions.push(assertion);
            }
        }

        Ok(result)
    }

    /// Extract and persist in one step.
    ///
    /// # Errors
    ///
    /// Propagates extraction and persistence errors.
    pub fn extract_and_commit<F>(
        &self,
        text: &str,
        extractor: F,
    ) -> Result<ExtractionResult, MemoryError>
    where
        F: Fn(&str) -> Result<Value, MemoryError>,
    {
        let result = self.extract(text, extractor)?;
        self.commit(&result)?;
        Ok(result)
    }

    /// Persist a compiled extraction result.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::EncodingError` or `MemoryError::StorageError`
    /// from the first failing write.
    pub fn commit(&self, result: &ExtractionResult) -> Result<(), MemoryError> {
        for entity in &result.entities {
            let value = serde_json::to_vec(entity)
                .map_err(|e| MemoryError::EncodingError(e.to_string()))?;
            self.store.put(&self.key("entity", &entity.id), &value)?;
        }
        for relation in &result.relations {
            let value = serde_json::to_vec(relation)
                .map_err(|e| MemoryError::EncodingError(e.to_string()))?;
            self.store.put(&self.key("relation", &relation.id), &value)?;
        }
        for assertion in &result.assertions {
            let value = serde_json::to_vec(assertion)
                .map_err(|e| MemoryError::EncodingError(e.to_string()))?;
            self.store.put(&self.key("assertion", &assertion.id), &value)?;
        }
        Ok(())
    }

    /// All persisted entities. Undecodable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the scan fails.
    pub fn entities(&self) -> Result<Vec<Entity>, MemoryError> {
        self.scan_kind("entity")
    }

    /// All persisted relations. Undecodable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the scan fails.
    pub fn relations(&self) -> Result<Vec<Relation>, MemoryError> {
        self.scan_kind("relation")
    }

    /// All persisted assertions. Undecodable records are skipped.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::StorageError` if the scan fails.
    pub fn assertions(&self) -> Result<Vec<Assertion>, MemoryError> {
        self.scan_kind("assertion")
    }

    fn scan_kind<T: serde::de::DeserializeOwned>(
        &self,
        kind: &str,
    ) -> Result<Vec<T>, MemoryError> {
        let records = self.store.scan_prefix(&self.prefix(kind))?;
        let mut out = Vec::with_capacity(records.len());
        for (key, value) in records {
            match serde_json::from_slice::<T>(&value) {
                Ok(record) => out.push(record),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "skipping undecodable extraction record");
                }
            }
        }
        Ok(out)
    }

    fn validate_entity(&self, entity: &Entity) -> bool {
        let Some(schema) = &self.schema else {
            return true;
        };
        if !schema.entity_types.is_empty() && !schema.entity_types.contains(&entity.entity_type) {
            return false;
        }
        self.common_checks(schema, entity.confidence, &entity.provenance)
    }

    fn validate_relation(&self, relation: &Relation) -> bool {
        let Some(schema) = &self.schema else {
            return true;
        };
        if !schema.relation_types.is_empty()
            && !schema.relation_types.contains(&relation.relation_type)
        {
            return false;
        }
        self.common_checks(schema, relation.confidence, &relation.provenance)
    }

    fn validate_assertion(&self, assertion: &Assertion) -> bool {
        let Some(schema) = &self.schema else {
            return true;
        };
        self.common_checks(schema, assertion.confidence, &assertion.provenance)
    }

    fn common_checks(&self, schema: &ExtractionSchema, confidence: f64, provenance: &str) -> bool {
        if schema.min_confidence > 0.0 && confidence < schema.min_confidence {
            return false;
        }
        if schema.require_provenance && provenance.is_empty() {
            return false;
        }
        true
    }
}

fn array_of_objects<'a>(
    raw: &'a Value,
    key: &str,
) -> impl Iterator<Item = &'a serde_json::Map<String, Value>> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|items| items.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn map_field(obj: &serde_json::Map<String, Value>, key: &str) -> Fact {
    obj.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Missing or zero confidence defaults to full confidence.
fn confidence_field(obj: &serde_json::Map<String, Value>) -> f64 {
    let confidence = obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
    if confidence == 0.0 {
        1.0
    } else {
        confidence
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use serde_json::json;

    fn extractor_output() -> Value {
        json!({
            "entities": [
                {"name": "Alice", "entity_type": "person", "confidence": 0.9},
                {"name": "TechCorp", "entity_type": "company"},
            ],
            "relations": [
                {"from_entity": "Alice", "relation_type": "works_at",
                 "to_entity": "TechCorp", "confidence": 0.8},
            ],
            "assertions": [
                {"subject": "Alice", "predicate": "role", "object": "engineer",
                 "confidence": 0.7},
            ]
        })
    }

    fn pipeline(schema: Option<ExtractionSchema>) -> ExtractionPipeline<MemoryKv> {
        ExtractionPipeline::new(Arc::new(MemoryKv::new()), "test", schema)
    }

    #[test]
    fn extract_compiles_all_record_kinds() {
        let pipeline = pipeline(None);
        let result = pipeline
            .extract("Alice works at TechCorp", |_| Ok(extractor_output()))
            .expect("extract");

        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.relations.len(), 1);
        assert_eq!(result.assertions.len(), 1);

        let alice = &result.entities[0];
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.confidence, 0.9);
        assert_eq!(alice.provenance, "Alice works at TechCorp");
        assert!(alice.timestamp > 0);

        // Missing confidence defaults to 1.0.
        assert_eq!(result.entities[1].confidence, 1.0);
    }

    #[test]
    fn ids_are_deterministic() {
        let pipeline = pipeline(None);
        let first = pipeline
            .extract("text", |_| Ok(extractor_output()))
            .expect("extract");
        let second = pipeline
            .extract("different text", |_| Ok(extractor_output()))
            .expect("extract");

        // Ids depend on record content, not source text.
        assert_eq!(first.entities[0].id, second.entities[0].id);
        assert_eq!(first.relations[0].id, second.relations[0].id);
        assert_eq!(first.assertions[0].id, second.assertions[0].id);
        assert_eq!(first.entities[0].id.len(), 16);
    }

    #[test]
    fn schema_filters_types_and_confidence() {
        let schema = ExtractionSchema {
            entity_types: vec!["person".to_string()],
            min_confidence: 0.75,
            ..ExtractionSchema::default()
        };
        let pipeline = pipeline(Some(schema));
        let result = pipeline
            .extract("text", |_| Ok(extractor_output()))
            .expect("extract");

        // "company" filtered by type; TechCorp would have passed on
        // confidence alone (default 1.0).
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].name, "Alice");

        // Relation at 0.8 passes, assertion at 0.7 fails.
        assert_eq!(result.relations.len(), 1);
        assert!(result.assertions.is_empty());
    }

    #[test]
    fn provenance_requirement() {
        let schema = ExtractionSchema {
            require_provenance: true,
            ..ExtractionSchema::default()
        };
        let pipeline = pipeline(Some(schema));

        let with_text = pipeline
            .extract("source text", |_| Ok(extractor_output()))
            .expect("extract");
        assert!(!with_text.entities.is_empty());

        let without_text = pipeline
            .extract("", |_| Ok(extractor_output()))
            .expect("extract");
        assert!(without_text.entities.is_empty());
    }

    #[test]
    fn malformed_items_are_dropped() {
        let pipeline = pipeline(None);
        let result = pipeline
            .extract("text", |_| {
                Ok(json!({
                    "entities": [
                        "not an object",
                        {"name": "Valid", "entity_type": "person"},
                    ],
                    "relations": "not an array"
                }))
            })
            .expect("extract");

        assert_eq!(result.entities.len(), 1);
        assert!(result.relations.is_empty());
        assert!(result.assertions.is_empty());
    }

    #[test]
    fn extractor_errors_propagate() {
        let pipeline = pipeline(None);
        let result = pipeline.extract("text", |_| {
            Err(MemoryError::ValidationError("model refused".to_string()))
        });
        assert!(matches!(result, Err(MemoryError::ValidationError(_))));
    }

    #[test]
    fn commit_and_list_roundtrip() {
        let pipeline = pipeline(None);
        pipeline
            .extract_and_commit("text", |_| Ok(extractor_output()))
            .expect("extract and commit");

        assert_eq!(pipeline.entities().expect("entities").len(), 2);
        assert_eq!(pipeline.relations().expect("relations").len(), 1);
        assert_eq!(pipeline.assertions().expect("assertions").len(), 1);
    }

    #[test]
    fn provenance_is_truncated() {
        let pipeline = pipeline(None);
        let long_text = "x".repeat(500);
        let result = pipeline
            .extract(&long_text, |_| Ok(extractor_output()))
            .expect("extract");
        assert_eq!(result.entities[0].provenance.chars().count(), 100);
    }
}
