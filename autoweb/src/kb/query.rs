//! Knowledge-base query path: analyzer + retrieval + answer synthesis.
//!
//! The analyzer LLM turns a natural-language question into a structured plan
//! (`filter_expr`, `search_query`) grounded on the field-registry listing, so
//! generated filter expressions only reference fields that actually exist.

use std::sync::Arc;

use serde_json::Value;

use crate::embedding::Embedder;
use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::prompts;
use crate::salvage::salvage_json;
use crate::vector::{AnnRequest, VectorBackend};

use super::registry::FieldRegistry;

/// Structured retrieval plan produced by the analyzer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPlan {
    pub filter_expr: String,
    pub search_query: String,
    pub sort_field: String,
    pub sort_order: String,
}

/// Query front-end over the KB collection.
pub struct KbQuery {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    registry: Arc<FieldRegistry>,
    llm: Arc<dyn LlmClient>,
    collection: String,
    top_k: usize,
}

impl KbQuery {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<FieldRegistry>,
        llm: Arc<dyn LlmClient>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            embedder,
            registry,
            llm,
            collection: collection.into(),
            top_k: 5,
        }
    }

    /// Analyzes the question into a retrieval plan. Analysis failures degrade
    /// to a plain semantic search over the raw question.
    pub async fn analyze(&self, question: &str) -> QueryPlan {
        let fallback = QueryPlan {
            search_query: question.to_string(),
            ..QueryPlan::default()
        };
        let fields = match self.registry.format_for_prompt().await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "field registry unavailable for query analysis");
                return fallback;
            }
        };
        let prompt = prompts::query_analyzer_prompt(&fields, question);
        let response = match self.llm.invoke(&[Message::user(prompt)]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "query analyzer llm failed");
                return fallback;
            }
        };
        let Ok(value) = salvage_json(&response.content) else {
            return fallback;
        };
        let get = |key: &str| -> String {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let mut plan = QueryPlan {
            filter_expr: get("filter_expr"),
            search_query: get("search_query"),
            sort_field: get("sort_field"),
            sort_order: get("sort_order"),
        };
        if plan.search_query.is_empty() {
            plan.search_query = question.to_string();
        }
        plan
    }

    /// Full question → answer round trip.
    pub async fn answer(&self, question: &str) -> Result<String, AgentError> {
        let plan = self.analyze(question).await;
        tracing::debug!(
            filter = %plan.filter_expr,
            query = %plan.search_query,
            "kb query plan"
        );

        let vector = self.embedder.embed_query(&plan.search_query).await?;
        let filter = (!plan.filter_expr.is_empty()).then_some(plan.filter_expr.as_str());
        let hits = self
            .backend
            .search(
                &self.collection,
                &AnnRequest {
                    field: "vector".into(),
                    vector,
                    limit: self.top_k,
                },
                filter,
                &["text", "source", "title"],
            )
            .await
            .map_err(|e| AgentError::failed(format!("kb search: {e}")))?;

        if hits.is_empty() {
            return Ok("The knowledge base has no matching entries.".to_string());
        }

        let context = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let source = hit.field_str("source");
                format!("[{}] {} (source: {source})", i + 1, hit.field_str("text"))
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = prompts::rag_answer_prompt(&context, question);
        let response = self.llm.invoke(&[Message::user(prompt)]).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::kb::{JsonFileStore, KbItem, KnowledgeWriter};
    use crate::llm::MockLlm;
    use crate::vector::InMemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    fn registry(dir: &std::path::Path) -> Arc<FieldRegistry> {
        Arc::new(FieldRegistry::new(Box::new(JsonFileStore::new(
            dir.join("field_registry.json"),
        ))))
    }

    /// **Scenario**: the analyzer parses the LLM plan and falls back to the raw
    /// question when parsing fails.
    #[tokio::test]
    async fn analyze_parses_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new([
            r#"{"filter_expr": "category == \"movie\"", "search_query": "top movies"}"#,
            "not json at all",
        ]));
        let q = KbQuery::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(MockEmbedder::new()),
            registry(dir.path()),
            llm,
            "kb",
        );

        let plan = q.analyze("what are the top movies?").await;
        assert_eq!(plan.filter_expr, "category == \"movie\"");
        assert_eq!(plan.search_query, "top movies");

        let plan = q.analyze("what are the top movies?").await;
        assert_eq!(plan.filter_expr, "");
        assert_eq!(plan.search_query, "what are the top movies?");
    }

    /// **Scenario**: end-to-end answer over stored documents; the answer prompt
    /// receives retrieved context.
    #[tokio::test]
    async fn answer_over_stored_docs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let reg = registry(dir.path());
        let writer = KnowledgeWriter::new(
            Arc::clone(&backend) as Arc<dyn VectorBackend>,
            Arc::new(MockEmbedder::new()),
            Arc::clone(&reg),
            "kb",
        );
        writer
            .add(
                KbItem::Object(
                    json!({"text": "The Shawshank Redemption tops the chart"})
                        .as_object()
                        .unwrap()
                        .clone(),
                ),
                "https://movies",
            )
            .await
            .unwrap();
        writer.flush_and_wait(Duration::from_secs(1)).await.unwrap();

        let llm = Arc::new(MockLlm::new([
            r#"{"search_query": "top chart movie"}"#,
            "The top movie is The Shawshank Redemption.",
        ]));
        let q = KbQuery::new(
            backend,
            Arc::new(MockEmbedder::new()),
            reg,
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            "kb",
        );
        let answer = q.answer("which movie tops the chart?").await.unwrap();
        assert!(answer.contains("Shawshank"));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("Shawshank"), "answer prompt carries context");
    }

    /// **Scenario**: empty store answers gracefully.
    #[tokio::test]
    async fn empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_collection(&crate::vector::CollectionSchema {
                name: "kb".into(),
                fields: vec![],
                scalar_indexes: vec![],
            })
            .await
            .unwrap();
        let llm = Arc::new(MockLlm::new([r#"{"search_query": "anything"}"#]));
        let q = KbQuery::new(backend, Arc::new(MockEmbedder::new()), registry(dir.path()), llm, "kb");
        let answer = q.answer("anything?").await.unwrap();
        assert!(answer.contains("no matching entries"));
    }
}
