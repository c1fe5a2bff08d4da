//! In-process backend: cosine search over rows held in memory.
//!
//! Used by the test suite and selected at runtime for `memory://` URIs so the
//! engine runs without external services. Weighted fusion mirrors the store's
//! ranker: per-request cosine scores are combined as `Σ wᵢ · scoreᵢ`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::cosine_similarity;

use super::{
    AnnRequest, CollectionSchema, KbDocument, Row, SearchHit, VectorBackend, VectorError,
};

#[derive(Default)]
struct Collection {
    schema: CollectionSchema,
    rows: Vec<Row>,
    kb_docs: Vec<KbDocument>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryBackend {
    collections: Mutex<HashMap<String, Collection>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of a collection (tests and diagnostics).
    pub fn row_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.rows.len())
            .unwrap_or(0)
    }

    /// KB document count of a collection.
    pub fn doc_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.kb_docs.len())
            .unwrap_or(0)
    }

    /// All stored KB documents (tests).
    pub fn kb_docs(&self, collection: &str) -> Vec<KbDocument> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.kb_docs.clone())
            .unwrap_or_default()
    }

    fn row_vector(row: &Row, field: &str) -> Option<Vec<f32>> {
        row.get(field).and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_f64)
                .map(|f| f as f32)
                .collect()
        })
    }

    fn project(row: &Row, output_fields: &[&str]) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for name in output_fields {
            if let Some(v) = row.get(*name) {
                out.insert(name.to_string(), v.clone());
            }
        }
        out
    }

    /// Supports the single expression shape the engine emits:
    /// `field == "value"`.
    fn matches_filter(row: &Row, filter: &str) -> bool {
        let Some((field, value)) = filter.split_once("==") else {
            return true;
        };
        let field = field.trim();
        let value = value.trim().trim_matches('"');
        row.get(field).and_then(Value::as_str) == Some(value)
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    async fn connect(&self) -> Result<(), VectorError> {
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, VectorError> {
        Ok(self.collections.lock().unwrap().contains_key(name))
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema, VectorError> {
        self.collections
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.schema.clone())
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorError> {
        self.collections.lock().unwrap().insert(
            schema.name.clone(),
            Collection {
                schema: schema.clone(),
                rows: Vec::new(),
                kb_docs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), VectorError> {
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }

    async fn insert_and_flush(&self, collection: &str, row: Row) -> Result<(), VectorError> {
        let mut guard = self.collections.lock().unwrap();
        let col = guard
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        col.rows.push(row);
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &str) -> Result<(), VectorError> {
        let mut guard = self.collections.lock().unwrap();
        let col = guard
            .get_mut(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        col.rows.retain(|row| !Self::matches_filter(row, filter));
        Ok(())
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        requests: &[AnnRequest],
        weights: &[f32],
        limit: usize,
        output_fields: &[&str],
    ) -> Result<Vec<SearchHit>, VectorError> {
        let guard = self.collections.lock().unwrap();
        let col = guard
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<SearchHit> = col
            .rows
            .iter()
            .map(|row| {
                let mut fused = 0.0f32;
                for (request, weight) in requests.iter().zip(weights) {
                    if let Some(stored) = Self::row_vector(row, &request.field) {
                        fused += weight * cosine_similarity(&request.vector, &stored);
                    }
                }
                SearchHit::new(fused, Self::project(row, output_fields))
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search(
        &self,
        collection: &str,
        request: &AnnRequest,
        filter: Option<&str>,
        output_fields: &[&str],
    ) -> Result<Vec<SearchHit>, VectorError> {
        let guard = self.collections.lock().unwrap();
        let col = guard
            .get(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<SearchHit> = col
            .rows
            .iter()
            .filter(|row| filter.map_or(true, |f| Self::matches_filter(row, f)))
            .filter_map(|row| {
                Self::row_vector(row, &request.field).map(|stored| {
                    SearchHit::new(
                        cosine_similarity(&request.vector, &stored),
                        Self::project(row, output_fields),
                    )
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn add_documents(
        &self,
        collection: &str,
        docs: Vec<KbDocument>,
    ) -> Result<(), VectorError> {
        let mut guard = self.collections.lock().unwrap();
        let col = guard.entry(collection.to_string()).or_default();
        // KB documents double as searchable rows so qa-style lookups work.
        for doc in &docs {
            let mut row = Row::new();
            row.insert(
                "vector".into(),
                Value::Array(
                    doc.vector
                        .iter()
                        .map(|f| Value::from(*f as f64))
                        .collect(),
                ),
            );
            row.insert("text".into(), Value::String(doc.text.clone()));
            for (k, v) in &doc.metadata {
                row.insert(k.clone(), v.clone());
            }
            col.rows.push(row);
        }
        col.kb_docs.extend(docs);
        Ok(())
    }
}
