//! OpenAI-compatible embedding client.

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequest, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::error::AgentError;

use super::Embedder;

/// Embedding client over the OpenAI embeddings API (or a compatible endpoint).
pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIEmbedder {
    /// Creates an embedder for `model`. `api_key`/`base_url` override the
    /// environment defaults when given.
    pub fn new(model: impl Into<String>, api_key: Option<&str>, base_url: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AgentError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input = if texts.len() == 1 {
            EmbeddingInput::String(texts[0].clone())
        } else {
            EmbeddingInput::StringArray(texts.to_vec())
        };
        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AgentError::failed(format!("embedding call: {e}")))?;
        if response.data.len() != texts.len() {
            return Err(AgentError::failed(format!(
                "embedding service returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }
        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }
}
