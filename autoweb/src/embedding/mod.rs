//! Embedding client abstraction.
//!
//! The caches embed several short texts per operation; this module defines the
//! trait, the OpenAI-compatible implementation, a memoizing wrapper, and a
//! deterministic mock whose cosine geometry is meaningful in tests.

mod cached;
mod mock;
mod openai;

pub use cached::CachedEmbedder;
pub use mock::MockEmbedder;
pub use openai::OpenAIEmbedder;

use async_trait::async_trait;

use crate::error::AgentError;

/// Text → dense vector. The dimension is stable per model and discovered by the
/// caches through a sentinel probe, not declared here.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a batch of documents, one vector per input, in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AgentError>;

    /// Embeds a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AgentError::failed("embedding service returned no vector"))
    }
}

/// Cosine similarity between two vectors; 0.0 on empty or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = na * nb;
    if denom <= 0.0 {
        0.0
    } else {
        dot / denom
    }
}
