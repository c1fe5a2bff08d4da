//! Backend trait: everything the caches and KB need from a vector store.

use async_trait::async_trait;

use super::{AnnRequest, CollectionSchema, Row, SearchHit, VectorError};

/// A knowledge-base document: text plus flat JSON metadata. The backend owns
/// embedding-at-insert for KB collections (`add_documents`), while cache
/// collections insert pre-embedded rows.
#[derive(Clone, Debug)]
pub struct KbDocument {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Typed operations over the vector store.
///
/// All methods already retry transient failures internally; callers treat any
/// returned error as final.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Health probe / connection establishment. Idempotent.
    async fn connect(&self) -> Result<(), VectorError>;

    async fn has_collection(&self, name: &str) -> Result<bool, VectorError>;

    /// Declared schema of an existing collection.
    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema, VectorError>;

    /// Creates the collection with a COSINE AUTOINDEX per vector field and an
    /// INVERTED index per `scalar_indexes` entry, then loads it.
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorError>;

    async fn drop_collection(&self, name: &str) -> Result<(), VectorError>;

    /// Inserts one row and flushes so the write becomes durable.
    async fn insert_and_flush(&self, collection: &str, row: Row) -> Result<(), VectorError>;

    /// Deletes rows matching `filter` (backend expression syntax, e.g.
    /// `cache_id == "..."`).
    async fn delete(&self, collection: &str, filter: &str) -> Result<(), VectorError>;

    /// Multi-vector ANN search fused by a weighted ranker. `weights` pairs with
    /// `requests` by index and is already normalized. Hits are sorted by fused
    /// score, best first, truncated to `limit`, carrying `output_fields`.
    async fn hybrid_search(
        &self,
        collection: &str,
        requests: &[AnnRequest],
        weights: &[f32],
        limit: usize,
        output_fields: &[&str],
    ) -> Result<Vec<SearchHit>, VectorError>;

    /// Single-vector search with an optional scalar filter expression.
    async fn search(
        &self,
        collection: &str,
        request: &AnnRequest,
        filter: Option<&str>,
        output_fields: &[&str],
    ) -> Result<Vec<SearchHit>, VectorError>;

    /// Batched KB document insert (pre-embedded) followed by a flush.
    async fn add_documents(
        &self,
        collection: &str,
        docs: Vec<KbDocument>,
    ) -> Result<(), VectorError>;
}
