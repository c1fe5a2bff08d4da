//! Persistent cache of DOM-analysis results.
//!
//! A row maps (normalized URL, compacted DOM skeleton, task intent) to the
//! locator-strategy list the analyzer produced for that page. Rows expire
//! after a TTL, and a retrieved row must additionally clear a hard task-intent
//! gate: high DOM similarity alone routinely matches the wrong page-level
//! intent (a list page looks like a detail page), so the hit's stored intent is
//! re-embedded and compared to the current task.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::AgentError;
use crate::state::LocatorStrategy;
use crate::vector::{
    filter_not_expired, normalize_weights, AnnRequest, CollectionSchema, FieldSchema, Row,
    VectorBackend, EXPIRE_TIME_FORMAT,
};

use super::{normalize_score, normalize_url, CacheCore, FailureLog};

const DOM_TEXT_MAX: usize = 12000;
const TASK_TEXT_MAX: usize = 1500;
const TASK_INTENT_COL_MAX: usize = 2000;
const SUGGESTIONS_MAX: usize = 65535;

const DEFAULT_WEIGHTS: [f32; 3] = [0.2, 0.7, 0.1];

/// A retrieved DOM-analysis row.
#[derive(Clone, Debug)]
pub struct DomCacheHit {
    pub id: String,
    /// Normalized to `[0, 1]`.
    pub score: f32,
    pub locator_suggestions: Vec<LocatorStrategy>,
    pub url_pattern: String,
    pub dom_hash: String,
    pub task_intent: String,
}

fn truncate_chars(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

/// Collapses whitespace and replaces integer runs with `0`, then truncates.
/// Stabilizes the embedding (and the hash) across session ids and timestamps.
pub fn compact_dom(dom_skeleton: &str) -> String {
    let mut out = String::with_capacity(dom_skeleton.len().min(DOM_TEXT_MAX + 8));
    let mut last_space = false;
    let mut digits = false;
    for c in dom_skeleton.chars() {
        if out.len() > DOM_TEXT_MAX {
            break;
        }
        if c.is_ascii_digit() {
            digits = true;
            continue;
        }
        if digits {
            out.push('0');
            digits = false;
        }
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    if digits {
        out.push('0');
    }
    truncate_chars(&mut out, DOM_TEXT_MAX);
    out
}

/// 16-hex-char digest over the compacted skeleton; stable across whitespace
/// and numeric noise.
pub fn dom_hash(dom_skeleton: &str) -> String {
    let digest = md5::compute(compact_dom(dom_skeleton).as_bytes());
    format!("{digest:x}")[..16].to_string()
}

fn task_intent(user_task: &str) -> String {
    let mut collapsed = user_task.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&mut collapsed, TASK_TEXT_MAX);
    collapsed
}

fn schema(collection: &str, dim: usize) -> CollectionSchema {
    CollectionSchema {
        name: collection.to_string(),
        fields: vec![
            FieldSchema::int64("pk").primary_auto(),
            FieldSchema::vector("url_vector", dim),
            FieldSchema::vector("dom_vector", dim),
            FieldSchema::vector("task_vector", dim),
            FieldSchema::varchar("cache_id", 128),
            FieldSchema::varchar("url_pattern", 512),
            FieldSchema::varchar("task_intent", TASK_INTENT_COL_MAX),
            FieldSchema::varchar("dom_hash", 64),
            FieldSchema::varchar("locator_suggestions", SUGGESTIONS_MAX),
            FieldSchema::varchar("created_at", 32),
            FieldSchema::varchar("updated_at", 32),
            FieldSchema::varchar("expire_at", 32),
            FieldSchema::int64("hit_count"),
            FieldSchema::int64("fail_count"),
        ],
        scalar_indexes: vec!["url_pattern".into(), "dom_hash".into(), "cache_id".into()],
    }
}

/// DOM cache manager with TTL rows and the task-intent gate.
pub struct DomCacheManager {
    core: CacheCore,
    failures: Arc<FailureLog>,
    weights: Vec<f32>,
    threshold: f32,
    task_min_sim: f32,
    ttl_hours: u64,
    top_k: usize,
}

impl DomCacheManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
        weights: &[f32],
        threshold: f32,
        task_min_sim: f32,
        ttl_hours: u64,
        top_k: usize,
        failures: Arc<FailureLog>,
    ) -> Self {
        let collection = collection.into();
        let schema_collection = collection.clone();
        Self {
            core: CacheCore::new(
                backend,
                embedder,
                collection,
                "DomCache",
                Box::new(move |dim| schema(&schema_collection, dim)),
            ),
            failures,
            weights: normalize_weights(weights, &DEFAULT_WEIGHTS),
            threshold,
            task_min_sim,
            ttl_hours: ttl_hours.max(1),
            top_k: top_k.max(1),
        }
    }

    async fn embed_three(
        &self,
        url_pattern: &str,
        dom_skeleton: &str,
        intent: &str,
    ) -> Result<Vec<Vec<f32>>, AgentError> {
        self.core
            .embedder()
            .embed_documents(&[
                url_pattern.to_string(),
                compact_dom(dom_skeleton),
                intent.to_string(),
            ])
            .await
    }

    /// Hybrid retrieval with TTL post-filter and the hard task-intent gate.
    /// Errors degrade to an empty result.
    pub async fn search(
        &self,
        user_task: &str,
        current_url: &str,
        dom_skeleton: &str,
    ) -> Vec<DomCacheHit> {
        match self.search_inner(user_task, current_url, dom_skeleton).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "dom cache search failed");
                Vec::new()
            }
        }
    }

    async fn search_inner(
        &self,
        user_task: &str,
        current_url: &str,
        dom_skeleton: &str,
    ) -> Result<Vec<DomCacheHit>, AgentError> {
        self.core.ensure_collection().await?;
        let url_pattern = normalize_url(current_url);
        let intent = task_intent(user_task);
        let vectors = self.embed_three(&url_pattern, dom_skeleton, &intent).await?;
        let query_task_vec = vectors[2].clone();

        let limit = self.top_k.max(8);
        let requests: Vec<AnnRequest> = ["url_vector", "dom_vector", "task_vector"]
            .iter()
            .zip(&vectors)
            .map(|(field, vector)| AnnRequest {
                field: field.to_string(),
                vector: vector.clone(),
                limit,
            })
            .collect();

        let raw = self
            .core
            .backend()
            .hybrid_search(
                self.core.collection(),
                &requests,
                &self.weights,
                limit,
                &[
                    "cache_id",
                    "url_pattern",
                    "dom_hash",
                    "task_intent",
                    "locator_suggestions",
                    "expire_at",
                ],
            )
            .await
            .map_err(|e| AgentError::failed(format!("dom cache search: {e}")))?;

        let now = chrono::Local::now().naive_local();
        let alive = filter_not_expired(raw, "expire_at", now);

        let mut hits = Vec::new();
        for item in alive {
            let score = normalize_score(item.score);
            if score < self.threshold {
                continue;
            }
            let stored_intent = item.field_str("task_intent");
            // Hard gate: the stored intent must match the current task even
            // when the hybrid score is high.
            let intent_vec = self
                .core
                .embedder()
                .embed_query(&stored_intent)
                .await?;
            let task_sim = cosine_similarity(&query_task_vec, &intent_vec);
            if task_sim < self.task_min_sim {
                tracing::debug!(
                    task_sim,
                    min = self.task_min_sim,
                    "dom cache hit dropped by task-intent gate"
                );
                continue;
            }
            let suggestions: Vec<LocatorStrategy> =
                serde_json::from_str(&item.field_str("locator_suggestions")).unwrap_or_default();
            hits.push(DomCacheHit {
                id: item.field_str("cache_id"),
                score,
                locator_suggestions: suggestions,
                url_pattern: item.field_str("url_pattern"),
                dom_hash: item.field_str("dom_hash"),
                task_intent: stored_intent,
            });
            if hits.len() >= self.top_k {
                break;
            }
        }
        Ok(hits)
    }

    /// Submits an analysis result for write-behind. Empty strategy lists are
    /// refused. Returns whether a write was submitted.
    pub async fn save(
        &self,
        user_task: &str,
        current_url: &str,
        dom_skeleton: &str,
        locator_suggestions: &[LocatorStrategy],
    ) -> bool {
        if locator_suggestions.is_empty() {
            tracing::debug!("skip dom cache save: empty locator suggestions");
            return false;
        }

        let url_pattern = normalize_url(current_url);
        let intent = task_intent(user_task);
        let vectors = match self.embed_three(&url_pattern, dom_skeleton, &intent).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed; skipping dom cache save");
                return false;
            }
        };

        let now = chrono::Local::now();
        let now_iso = now.format(EXPIRE_TIME_FORMAT).to_string();
        let expire_iso = (now + chrono::Duration::hours(self.ttl_hours as i64))
            .format(EXPIRE_TIME_FORMAT)
            .to_string();
        let hash = dom_hash(dom_skeleton);
        let cache_id = format!("{hash}_{}", now.format("%Y%m%d%H%M%S"));

        let mut serialized =
            serde_json::to_string(locator_suggestions).unwrap_or_else(|_| "[]".to_string());
        truncate_chars(&mut serialized, SUGGESTIONS_MAX);

        let mut row = Row::new();
        row.insert("url_vector".into(), json!(vectors[0]));
        row.insert("dom_vector".into(), json!(vectors[1]));
        row.insert("task_vector".into(), json!(vectors[2]));
        row.insert("cache_id".into(), json!(cache_id.clone()));
        row.insert("url_pattern".into(), json!(url_pattern));
        row.insert("task_intent".into(), json!(intent));
        row.insert("dom_hash".into(), json!(hash));
        row.insert("locator_suggestions".into(), json!(serialized));
        row.insert("created_at".into(), json!(now_iso.clone()));
        row.insert("updated_at".into(), json!(now_iso));
        row.insert("expire_at".into(), json!(expire_iso));
        row.insert("hit_count".into(), json!(0));
        row.insert("fail_count".into(), json!(0));

        let backend = Arc::clone(self.core.backend());
        let collection = self.core.collection().to_string();
        let ttl_hours = self.ttl_hours;
        self.core.writer().submit(async move {
            match backend.insert_and_flush(&collection, row).await {
                Ok(()) => tracing::info!(cache_id = %cache_id, ttl_hours, "dom cache row saved"),
                Err(e) => tracing::warn!(cache_id = %cache_id, error = %e, "dom cache save failed"),
            }
        })
    }

    /// Audits a hit whose suggestions preceded a failed step.
    pub fn record_failure(&self, cache_id: &str, reason: &str) {
        self.failures.record(cache_id, "dom", reason);
    }

    /// Human-driven permanent removal of one row.
    pub async fn invalidate(&self, cache_id: &str) -> Result<(), AgentError> {
        if cache_id.is_empty() {
            return Ok(());
        }
        self.core.ensure_collection().await?;
        let safe = cache_id.replace('"', "\\\"");
        self.core
            .backend()
            .delete(self.core.collection(), &format!("cache_id == \"{safe}\""))
            .await
            .map_err(|e| AgentError::failed(format!("dom cache invalidate: {e}")))
    }

    pub async fn drain(&self, timeout: Duration) -> bool {
        self.core.writer().drain(timeout).await
    }

    pub async fn shutdown(&self, timeout: Duration) {
        self.core.shutdown(timeout).await;
    }
}
