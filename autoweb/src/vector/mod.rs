//! Typed gateway over the vector store.
//!
//! The caches and the knowledge base talk to a [`VectorBackend`] trait object:
//! collection lifecycle, row insert + flush, weighted hybrid ANN search,
//! single-vector search with scalar filters, and deletion by expression.
//! Implementations: [`MilvusClient`] (REST over HTTP) and [`InMemoryBackend`]
//! (in-process cosine search for tests and `memory://` URIs).
//!
//! Transient failures retry with exponential backoff; schema-class failures
//! abort immediately so an incompatible collection is rebuilt instead of
//! hammered.

mod backend;
mod error;
mod memory;
mod milvus;
mod retry;
mod types;
mod weights;

pub use backend::{KbDocument, VectorBackend};
pub use error::VectorError;
pub use memory::InMemoryBackend;
pub use milvus::{parse_uri, MilvusClient};
pub use retry::{is_retryable_message, run_with_retry, RetryPolicy};
pub use types::{
    filter_not_expired, AnnRequest, CollectionSchema, FieldKind, FieldSchema, Row,
    SearchHit, EXPIRE_TIME_FORMAT,
};
pub use weights::normalize_weights;
