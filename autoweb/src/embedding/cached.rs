//! Memoizing wrapper around an [`Embedder`].
//!
//! The caches re-embed the same short strings constantly (dim probes, task
//! intents on the task gate); exact-text memoization removes those round trips.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AgentError;

use super::Embedder;

/// Exact-text embedding cache. Shared via `Arc`, so one instance serves the
/// whole engine.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: DashMap<String, Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of memoized texts (tests and diagnostics).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AgentError> {
        let mut misses: Vec<String> = Vec::new();
        for text in texts {
            if !self.cache.contains_key(text) && !misses.contains(text) {
                misses.push(text.clone());
            }
        }
        if !misses.is_empty() {
            let vectors = self.inner.embed_documents(&misses).await?;
            for (text, vector) in misses.into_iter().zip(vectors) {
                self.cache.insert(text, vector);
            }
        }
        texts
            .iter()
            .map(|t| {
                self.cache
                    .get(t)
                    .map(|v| v.clone())
                    .ok_or_else(|| AgentError::failed("embedding cache miss after fill"))
            })
            .collect()
    }
}
