//! Buffered knowledge-base writer.
//!
//! `add` normalizes incoming items into `(text, metadata)` documents and
//! buffers them; the buffer drains through a single-worker queue when it
//! reaches the batch threshold or on explicit `flush`. Dynamic-field names are
//! registered *before* the insert they describe, so query-time prompts always
//! see at least the schema of already-visible rows.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::embedding::Embedder;
use crate::error::AgentError;
use crate::vector::{KbDocument, VectorBackend};

use super::infer::{infer_dynamic_value, DynValue};
use super::registry::FieldRegistry;
use super::FIXED_FILTERABLE_FIELDS;

const BATCH_THRESHOLD: usize = 10;

/// Keys tried, in order, for the document text of an object item.
const TEXT_KEYS: &[&str] = &["text", "content", "page_content", "description", "summary"];

/// One item accepted by `add`.
pub enum KbItem {
    Text(String),
    Object(Map<String, Value>),
    List(Vec<Value>),
}

impl From<&str> for KbItem {
    fn from(s: &str) -> Self {
        KbItem::Text(s.to_string())
    }
}

/// A buffered document before batch processing. The percent marker travels
/// here, on the batch object, and never reaches the persisted record.
#[derive(Clone, Debug)]
struct BufferedDoc {
    text: String,
    fixed: Map<String, Value>,
    dynamic: Vec<(String, DynValue)>,
}

/// Buffered writer over the KB collection.
pub struct KnowledgeWriter {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    registry: Arc<FieldRegistry>,
    collection: String,
    buffer: Mutex<Vec<BufferedDoc>>,
    writer: crate::cache::WriteBehind,
}

impl KnowledgeWriter {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<FieldRegistry>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            embedder,
            registry,
            collection: collection.into(),
            buffer: Mutex::new(Vec::new()),
            writer: crate::cache::WriteBehind::new("KbWriter"),
        }
    }

    /// Buffered documents not yet submitted.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    fn normalize_object(obj: Map<String, Value>, source: &str) -> BufferedDoc {
        let text = TEXT_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| serde_json::to_string(&obj).unwrap_or_default());

        let mut fixed = Map::new();
        fixed.insert("source".into(), Value::String(source.to_string()));
        for key in &["title", "category", "data_type", "platform"] {
            let value = obj
                .get(*key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            fixed.insert(key.to_string(), Value::String(value));
        }
        fixed.insert(
            "crawled_at".into(),
            Value::String(chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
        );

        let mut dynamic = Vec::new();
        for (key, value) in obj {
            if FIXED_FILTERABLE_FIELDS.contains(&key.as_str())
                || TEXT_KEYS.contains(&key.as_str())
            {
                continue;
            }
            let raw = match &value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                // Nested structures are not scalars; skip.
                _ => continue,
            };
            if let Some(inferred) = infer_dynamic_value(&raw) {
                dynamic.push((key, inferred));
            }
        }
        BufferedDoc { text, fixed, dynamic }
    }

    fn normalize(item: KbItem, source: &str) -> Vec<BufferedDoc> {
        match item {
            KbItem::Text(text) => {
                if text.trim().len() < 10 {
                    return Vec::new();
                }
                let mut fixed = Map::new();
                fixed.insert("source".into(), Value::String(source.to_string()));
                for key in &["title", "category", "data_type", "platform"] {
                    fixed.insert(key.to_string(), Value::String(String::new()));
                }
                fixed.insert(
                    "crawled_at".into(),
                    Value::String(chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
                );
                vec![BufferedDoc { text, fixed, dynamic: Vec::new() }]
            }
            KbItem::Object(obj) => vec![Self::normalize_object(obj, source)],
            KbItem::List(values) => values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(obj) => Some(Self::normalize_object(obj, source)),
                    Value::String(s) => Self::normalize(KbItem::Text(s), source).into_iter().next(),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Accepts a string, object, or list of objects. Returns the number of
    /// documents buffered. Triggers an async flush at the batch threshold.
    pub async fn add(&self, item: KbItem, source: &str) -> Result<usize, AgentError> {
        let docs = Self::normalize(item, source);
        let added = docs.len();
        if added == 0 {
            return Ok(0);
        }

        // Registry update precedes the insert these fields describe.
        let mut observations: Vec<(String, bool)> = Vec::new();
        for doc in &docs {
            for (name, value) in &doc.dynamic {
                observations.push((name.clone(), matches!(value, DynValue::Number { .. })));
            }
        }
        self.registry.register(&observations).await?;

        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.extend(docs);
            buffer.len() >= BATCH_THRESHOLD
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(added)
    }

    /// Percent-consistency check: per dynamic field, when percent-derived
    /// numbers are a minority (<50 %) of the field's numeric values in this
    /// batch, those values are dropped as inconsistent formatting.
    fn batch_consistency(batch: &mut [BufferedDoc]) {
        let mut field_names: HashSet<String> = HashSet::new();
        for doc in batch.iter() {
            for (name, _) in &doc.dynamic {
                field_names.insert(name.clone());
            }
        }
        for name in field_names {
            let mut numeric = 0usize;
            let mut percent = 0usize;
            for doc in batch.iter() {
                for (n, v) in &doc.dynamic {
                    if n == &name {
                        if let DynValue::Number { from_percent, .. } = v {
                            numeric += 1;
                            if *from_percent {
                                percent += 1;
                            }
                        }
                    }
                }
            }
            if percent > 0 && (percent as f64) < 0.5 * numeric as f64 {
                for doc in batch.iter_mut() {
                    doc.dynamic.retain(|(n, v)| {
                        n != &name || !matches!(v, DynValue::Number { from_percent: true, .. })
                    });
                }
                tracing::debug!(field = %name, dropped = percent, "percent-minority values removed");
            }
        }
    }

    fn to_kb_document(doc: BufferedDoc, vector: Vec<f32>) -> KbDocument {
        let mut metadata = doc.fixed;
        for (name, value) in doc.dynamic {
            // The percent marker stays on the batch object; only the value
            // itself is persisted.
            let json_value = match value {
                DynValue::Number { value, .. } => {
                    Value::Number(serde_json::Number::from_f64(value).unwrap_or_else(|| 0.into()))
                }
                DynValue::Str(s) => Value::String(s),
            };
            metadata.insert(name, json_value);
        }
        KbDocument {
            text: doc.text,
            vector,
            metadata,
        }
    }

    /// Submits the current buffer for persistence and returns the batch size.
    pub async fn flush(&self) -> Result<usize, AgentError> {
        let mut batch: Vec<BufferedDoc> = std::mem::take(&mut *self.buffer.lock().unwrap());
        if batch.is_empty() {
            return Ok(0);
        }
        Self::batch_consistency(&mut batch);

        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        let docs: Vec<KbDocument> = batch
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| Self::to_kb_document(doc, vector))
            .collect();
        let count = docs.len();

        let backend = Arc::clone(&self.backend);
        let collection = self.collection.clone();
        self.writer.submit(async move {
            match backend.add_documents(&collection, docs).await {
                Ok(()) => tracing::info!(count, collection = %collection, "kb batch persisted"),
                Err(e) => tracing::warn!(error = %e, "kb batch persist failed"),
            }
        });
        Ok(count)
    }

    /// Flushes and waits (bounded) for the persistence to land.
    pub async fn flush_and_wait(&self, timeout: Duration) -> Result<usize, AgentError> {
        let count = self.flush().await?;
        self.writer.drain(timeout).await;
        Ok(count)
    }

    /// Final drain: flush the buffer and stop the worker. Guaranteed on
    /// process exit through the engine's shutdown path.
    pub async fn shutdown(&self, timeout: Duration) {
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "kb flush on shutdown failed");
        }
        self.writer.shutdown(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::kb::JsonFileStore;
    use crate::vector::InMemoryBackend;
    use serde_json::json;

    fn writer(backend: Arc<InMemoryBackend>, dir: &std::path::Path) -> KnowledgeWriter {
        let registry = Arc::new(FieldRegistry::new(Box::new(JsonFileStore::new(
            dir.join("field_registry.json"),
        ))));
        KnowledgeWriter::new(backend, Arc::new(MockEmbedder::new()), registry, "kb")
    }

    fn obj(pairs: &[(&str, Value)]) -> KbItem {
        KbItem::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    /// **Scenario**: text selection prefers the first present key of
    /// text|content|page_content|description|summary, else serializes.
    #[tokio::test]
    async fn text_key_selection() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let w = writer(Arc::clone(&backend), dir.path());

        w.add(obj(&[("description", json!("a movie")), ("rank", json!("3"))]), "https://s")
            .await
            .unwrap();
        w.add(obj(&[("rank", json!("4"))]), "https://s").await.unwrap();
        w.flush_and_wait(Duration::from_secs(1)).await.unwrap();

        let docs = backend.kb_docs("kb");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "a movie");
        assert!(docs[1].text.contains("\"rank\""), "fallback serializes the object");
    }

    /// **Scenario**: buffer flushes automatically at the threshold of 10.
    #[tokio::test]
    async fn threshold_flush() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let w = writer(Arc::clone(&backend), dir.path());

        for i in 0..9 {
            w.add(obj(&[("title", json!(format!("row {i}"))), ("text", json!("some text"))]), "s")
                .await
                .unwrap();
        }
        assert_eq!(w.buffered(), 9);
        assert_eq!(backend.doc_count("kb"), 0);

        w.add(obj(&[("text", json!("row 9"))]), "s").await.unwrap();
        assert_eq!(w.buffered(), 0, "threshold reached, buffer submitted");
        w.flush_and_wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(backend.doc_count("kb"), 10);
    }

    /// **Scenario**: dynamic fields are inferred and registered before the
    /// insert; metadata carries numbers as numbers.
    #[tokio::test]
    async fn dynamic_fields_registered_and_typed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let w = writer(Arc::clone(&backend), dir.path());

        w.add(
            obj(&[
                ("text", json!("movie row")),
                ("price", json!("$1,234")),
                ("genre", json!("Drama")),
                ("empty", json!("N/A")),
            ]),
            "https://site/x",
        )
        .await
        .unwrap();

        // Registry visible before any flush (invariant 4).
        let registry_file = std::fs::read_to_string(dir.path().join("field_registry.json")).unwrap();
        assert!(registry_file.contains("price"));
        assert!(registry_file.contains("genre"));
        assert!(!registry_file.contains("empty"));

        w.flush_and_wait(Duration::from_secs(1)).await.unwrap();
        let docs = backend.kb_docs("kb");
        assert_eq!(docs[0].metadata.get("price"), Some(&json!(1234.0)));
        assert_eq!(docs[0].metadata.get("genre"), Some(&json!("Drama")));
        assert_eq!(docs[0].metadata.get("source"), Some(&json!("https://site/x")));
        assert!(docs[0].metadata.get("_pct_fields").is_none());
        assert!(!docs[0].metadata.contains_key("empty"));
    }

    /// **Scenario**: percent-minority values are removed by the batch check;
    /// a percent-majority field keeps them.
    #[tokio::test]
    async fn percent_consistency() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let w = writer(Arc::clone(&backend), dir.path());

        // "score": 1 percent-derived out of 3 numeric → minority → dropped.
        // "share": 2 of 2 percent-derived → majority → kept.
        for (score, share) in [("80%", "10%"), ("75", "20%"), ("90", "30")] {
            w.add(
                obj(&[("text", json!("row")), ("score", json!(score)), ("share", json!(share))]),
                "s",
            )
            .await
            .unwrap();
        }
        w.flush_and_wait(Duration::from_secs(1)).await.unwrap();

        let docs = backend.kb_docs("kb");
        let with_score = docs.iter().filter(|d| d.metadata.contains_key("score")).count();
        assert_eq!(with_score, 2, "the percent-derived score must be dropped");
        let with_share = docs.iter().filter(|d| d.metadata.contains_key("share")).count();
        assert_eq!(with_share, 3, "percent-majority share values stay");
    }

    /// **Scenario**: short strings are rejected; lists fan out per element.
    #[tokio::test]
    async fn list_and_short_text() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let w = writer(Arc::clone(&backend), dir.path());

        assert_eq!(w.add(KbItem::Text("short".into()), "s").await.unwrap(), 0);
        let added = w
            .add(
                KbItem::List(vec![
                    json!({"text": "first element row"}),
                    json!({"text": "second element row"}),
                    json!(42),
                ]),
                "s",
            )
            .await
            .unwrap();
        assert_eq!(added, 2);
    }
}
