//! Shared core for the vector-backed cache managers.
//!
//! Owns one collection, the embedding dimension probe, and the write-behind
//! worker. `ensure_collection` is idempotent and guarded, so concurrent callers
//! perform the schema check exactly once per process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::embedding::Embedder;
use crate::error::AgentError;
use crate::vector::{CollectionSchema, VectorBackend};

use super::WriteBehind;

const DIM_PROBE_SENTINEL: &str = "cache_dim_probe";

type SchemaBuilder = Box<dyn Fn(usize) -> CollectionSchema + Send + Sync>;

struct Ensured {
    dim: usize,
}

/// One collection + its embedder + a single-worker writer.
pub struct CacheCore {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    schema_builder: SchemaBuilder,
    ensured: Mutex<Option<Ensured>>,
    writer: WriteBehind,
    label: &'static str,
}

impl CacheCore {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
        label: &'static str,
        schema_builder: SchemaBuilder,
    ) -> Self {
        Self {
            backend,
            embedder,
            collection: collection.into(),
            schema_builder,
            ensured: Mutex::new(None),
            writer: WriteBehind::new(label),
            label,
        }
    }

    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn writer(&self) -> &WriteBehind {
        &self.writer
    }

    /// Ensures the collection exists with a compatible schema and returns the
    /// embedding dimension. An existing collection missing required fields or
    /// carrying mismatched vector dims is dropped and recreated with a loud
    /// warning.
    pub async fn ensure_collection(&self) -> Result<usize, AgentError> {
        let mut guard = self.ensured.lock().await;
        if let Some(ensured) = guard.as_ref() {
            return Ok(ensured.dim);
        }

        self.backend
            .connect()
            .await
            .map_err(|e| AgentError::failed(format!("{}: connect: {e}", self.label)))?;

        let probe = self
            .embedder
            .embed_query(DIM_PROBE_SENTINEL)
            .await
            .map_err(|e| AgentError::failed(format!("{}: dim probe: {e}", self.label)))?;
        let dim = probe.len();
        let required = (self.schema_builder)(dim);

        let exists = self
            .backend
            .has_collection(&self.collection)
            .await
            .map_err(|e| AgentError::failed(format!("{}: has_collection: {e}", self.label)))?;

        if exists {
            let current = self
                .backend
                .describe_collection(&self.collection)
                .await
                .map_err(|e| AgentError::failed(format!("{}: describe: {e}", self.label)))?;
            if !current.is_compatible_with(&required) {
                tracing::warn!(
                    cache = self.label,
                    collection = %self.collection,
                    dim,
                    "incompatible schema: dropping and recreating collection"
                );
                self.backend
                    .drop_collection(&self.collection)
                    .await
                    .map_err(|e| AgentError::failed(format!("{}: drop: {e}", self.label)))?;
                self.backend
                    .create_collection(&required)
                    .await
                    .map_err(|e| AgentError::failed(format!("{}: create: {e}", self.label)))?;
                tracing::info!(cache = self.label, collection = %self.collection, dim, "collection recreated");
            }
        } else {
            self.backend
                .create_collection(&required)
                .await
                .map_err(|e| AgentError::failed(format!("{}: create: {e}", self.label)))?;
            tracing::info!(cache = self.label, collection = %self.collection, dim, "collection created");
        }

        *guard = Some(Ensured { dim });
        Ok(dim)
    }

    /// Drains pending writes, bounded.
    pub async fn shutdown(&self, timeout: Duration) {
        self.writer.shutdown(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::vector::{FieldSchema, InMemoryBackend};

    fn core_with(backend: Arc<InMemoryBackend>) -> CacheCore {
        CacheCore::new(
            backend,
            Arc::new(MockEmbedder::new()),
            "test_cache",
            "TestCache",
            Box::new(|dim| CollectionSchema {
                name: "test_cache".into(),
                fields: vec![
                    FieldSchema::int64("pk").primary_auto(),
                    FieldSchema::vector("v", dim),
                    FieldSchema::varchar("cache_id", 128),
                ],
                scalar_indexes: vec!["cache_id".into()],
            }),
        )
    }

    /// **Scenario**: first ensure creates the collection; the second is a no-op
    /// returning the same probed dimension.
    #[tokio::test]
    async fn ensure_is_idempotent() {
        let backend = Arc::new(InMemoryBackend::new());
        let core = core_with(Arc::clone(&backend));
        let dim = core.ensure_collection().await.unwrap();
        assert!(dim > 0);
        assert!(backend.has_collection("test_cache").await.unwrap());
        let dim2 = core.ensure_collection().await.unwrap();
        assert_eq!(dim, dim2);
    }

    /// **Scenario**: an existing collection with a mismatched vector dim is
    /// dropped and recreated.
    #[tokio::test]
    async fn incompatible_schema_recreated() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_collection(&CollectionSchema {
                name: "test_cache".into(),
                fields: vec![FieldSchema::vector("v", 7)],
                scalar_indexes: vec![],
            })
            .await
            .unwrap();

        let core = core_with(Arc::clone(&backend));
        let dim = core.ensure_collection().await.unwrap();
        let desc = backend.describe_collection("test_cache").await.unwrap();
        assert_eq!(desc.vector_dim("v"), Some(dim));
        assert_ne!(dim, 7);
    }
}
