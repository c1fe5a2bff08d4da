//! Persistent cache of generated automation programs.
//!
//! A row ties one program to four embedded views of the turn that produced it:
//! the plan goal, the locator summary, the raw user task, and the normalized
//! URL. Retrieval fuses all four with a weighted ranker; a hit above the
//! similarity threshold replaces the Coder entirely for that turn.
//!
//! Rows are immutable once written. Failures are audited to JSONL and the
//! per-turn breaker suppresses retrieval; only an explicit `invalidate`
//! deletes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::embedding::Embedder;
use crate::error::AgentError;
use crate::vector::{
    normalize_weights, AnnRequest, CollectionSchema, FieldSchema, Row, VectorBackend,
    EXPIRE_TIME_FORMAT,
};

use super::{normalize_score, normalize_url, CacheCore, FailureLog};

const GOAL_MAX: usize = 2000;
const LOCATOR_MAX: usize = 6400;
const USER_TASK_MAX: usize = 6400;
const URL_MAX: usize = 512;
const CODE_MAX: usize = 16000;
/// Code above this length still saves, with a warning.
const CODE_WARN: usize = 6400;

const DEFAULT_WEIGHTS: [f32; 4] = [0.6, 0.2, 0.1, 0.1];

/// A retrieved program with its provenance.
#[derive(Clone, Debug)]
pub struct CodeCacheHit {
    pub id: String,
    pub code: String,
    /// Normalized to `[0, 1]`.
    pub score: f32,
    pub url_pattern: String,
    pub goal: String,
    pub user_task: String,
    pub success_count: i64,
}

/// Everything needed to persist one program.
#[derive(Clone, Debug)]
pub struct CodeSaveRequest {
    pub goal: String,
    pub user_task: String,
    pub locator_info: String,
    pub url: String,
    pub code: String,
    pub dom_hash: String,
}

/// Code cache manager: one collection, hybrid retrieval, write-behind saves.
pub struct CodeCacheManager {
    core: CacheCore,
    failures: Arc<FailureLog>,
    weights: Vec<f32>,
    threshold: f32,
    duplicate_threshold: f32,
    top_k: usize,
}

fn truncated(text: &str, max: usize) -> String {
    let mut s = text.to_string();
    if s.len() > max {
        let mut cut = max;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

fn schema(collection: &str, dim: usize) -> CollectionSchema {
    CollectionSchema {
        name: collection.to_string(),
        fields: vec![
            FieldSchema::int64("pk").primary_auto(),
            FieldSchema::vector("goal_vector", dim),
            FieldSchema::vector("locator_vector", dim),
            FieldSchema::vector("user_task_vector", dim),
            FieldSchema::vector("url_vector", dim),
            FieldSchema::varchar("cache_id", 128),
            FieldSchema::varchar("goal", GOAL_MAX),
            FieldSchema::varchar("locator_info", LOCATOR_MAX),
            FieldSchema::varchar("user_task", USER_TASK_MAX),
            FieldSchema::varchar("url_pattern", URL_MAX),
            FieldSchema::varchar("code", CODE_MAX),
            FieldSchema::varchar("dom_hash", 64),
            FieldSchema::int64("success_count"),
            FieldSchema::int64("fail_count"),
            FieldSchema::varchar("created_at", 32),
            FieldSchema::varchar("updated_at", 32),
        ],
        scalar_indexes: vec!["url_pattern".into(), "dom_hash".into(), "cache_id".into()],
    }
}

/// True for pure-navigation programs: short, few lines, and centered on a
/// `navigate(url)` call. These never enter the cache — a plain goto carries no
/// reusable logic.
pub fn is_navigation_code(code: &str) -> bool {
    let trimmed = code.trim();
    if trimmed.len() > 200 {
        return false;
    }
    let lines = trimmed.lines().filter(|l| !l.trim().is_empty()).count();
    lines <= 3 && trimmed.contains("navigate(")
}

impl CodeCacheManager {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
        weights: &[f32],
        threshold: f32,
        duplicate_threshold: f32,
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
                "CodeCache",
                Box::new(move |dim| schema(&schema_collection, dim)),
            ),
            failures,
            weights: normalize_weights(weights, &DEFAULT_WEIGHTS),
            threshold,
            duplicate_threshold,
            top_k: top_k.max(1),
        }
    }

    async fn embed_four(
        &self,
        goal: &str,
        locator_info: &str,
        user_task: &str,
        url_pattern: &str,
    ) -> Result<Vec<Vec<f32>>, AgentError> {
        self.core
            .embedder()
            .embed_documents(&[
                truncated(goal, GOAL_MAX),
                truncated(locator_info, LOCATOR_MAX),
                truncated(user_task, USER_TASK_MAX),
                truncated(url_pattern, URL_MAX),
            ])
            .await
    }

    fn requests(vectors: &[Vec<f32>], limit: usize) -> Vec<AnnRequest> {
        ["goal_vector", "locator_vector", "user_task_vector", "url_vector"]
            .iter()
            .zip(vectors)
            .map(|(field, vector)| AnnRequest {
                field: field.to_string(),
                vector: vector.clone(),
                limit,
            })
            .collect()
    }

    async fn raw_search(
        &self,
        goal: &str,
        locator_info: &str,
        user_task: &str,
        url: &str,
        top_k: usize,
    ) -> Result<Vec<CodeCacheHit>, AgentError> {
        self.core.ensure_collection().await?;
        let url_pattern = normalize_url(url);
        let vectors = self.embed_four(goal, locator_info, user_task, &url_pattern).await?;
        let limit = top_k.max(10);
        let hits = self
            .core
            .backend()
            .hybrid_search(
                self.core.collection(),
                &Self::requests(&vectors, limit),
                &self.weights,
                limit,
                &[
                    "cache_id",
                    "code",
                    "url_pattern",
                    "goal",
                    "user_task",
                    "success_count",
                ],
            )
            .await
            .map_err(|e| AgentError::failed(format!("code cache search: {e}")))?;
        Ok(hits
            .into_iter()
            .map(|hit| CodeCacheHit {
                id: hit.field_str("cache_id"),
                code: hit.field_str("code"),
                score: normalize_score(hit.score),
                url_pattern: hit.field_str("url_pattern"),
                goal: hit.field_str("goal"),
                user_task: hit.field_str("user_task"),
                success_count: hit
                    .field("success_count")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            })
            .take(top_k)
            .collect())
    }

    /// Hybrid retrieval. Returns hits at or above the similarity threshold,
    /// best first. Errors degrade to an empty result: a broken cache must never
    /// break the turn.
    pub async fn search(
        &self,
        goal: &str,
        locator_info: &str,
        user_task: &str,
        url: &str,
    ) -> Vec<CodeCacheHit> {
        match self
            .raw_search(goal, locator_info, user_task, url, self.top_k)
            .await
        {
            Ok(hits) => {
                let passing: Vec<CodeCacheHit> = hits
                    .into_iter()
                    .filter(|h| h.score >= self.threshold)
                    .collect();
                tracing::debug!(hits = passing.len(), threshold = self.threshold, "code cache search");
                passing
            }
            Err(e) => {
                tracing::warn!(error = %e, "code cache search failed");
                Vec::new()
            }
        }
    }

    /// Submits a save for write-behind. Navigation-only programs are skipped;
    /// near-duplicates (re-search ≥ duplicate threshold) are skipped; oversized
    /// code logs a warning but still saves (the store truncates at its column
    /// bound). Returns whether a write was submitted.
    pub async fn save(&self, request: CodeSaveRequest) -> bool {
        if is_navigation_code(&request.code) {
            tracing::debug!("skip code cache save: pure navigation program");
            return false;
        }
        if request.code.len() > CODE_WARN {
            tracing::warn!(len = request.code.len(), "code cache save: oversized program");
        }

        match self
            .raw_search(
                &request.goal,
                &request.locator_info,
                &request.user_task,
                &request.url,
                1,
            )
            .await
        {
            Ok(hits) => {
                if let Some(best) = hits.first() {
                    if best.score >= self.duplicate_threshold {
                        tracing::debug!(
                            existing = %best.id,
                            score = best.score,
                            "skip code cache save: duplicate"
                        );
                        return false;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "duplicate check failed; skipping save");
                return false;
            }
        }

        let url_pattern = normalize_url(&request.url);
        let vectors = match self
            .embed_four(
                &request.goal,
                &request.locator_info,
                &request.user_task,
                &url_pattern,
            )
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed; skipping save");
                return false;
            }
        };

        let now = chrono::Local::now();
        let now_iso = now.format(EXPIRE_TIME_FORMAT).to_string();
        let cache_id = format!("{}_{}", request.dom_hash, now.format("%Y%m%d%H%M%S"));

        let mut row = Row::new();
        for (field, vector) in ["goal_vector", "locator_vector", "user_task_vector", "url_vector"]
            .iter()
            .zip(&vectors)
        {
            row.insert(field.to_string(), json!(vector));
        }
        row.insert("cache_id".into(), json!(cache_id.clone()));
        row.insert("goal".into(), json!(truncated(&request.goal, GOAL_MAX)));
        row.insert(
            "locator_info".into(),
            json!(truncated(&request.locator_info, LOCATOR_MAX)),
        );
        row.insert(
            "user_task".into(),
            json!(truncated(&request.user_task, USER_TASK_MAX)),
        );
        row.insert("url_pattern".into(), json!(url_pattern));
        row.insert("code".into(), json!(truncated(&request.code, CODE_MAX)));
        row.insert("dom_hash".into(), json!(request.dom_hash));
        row.insert("success_count".into(), json!(0));
        row.insert("fail_count".into(), json!(0));
        row.insert("created_at".into(), json!(now_iso));
        row.insert("updated_at".into(), json!(now_iso));

        let backend = Arc::clone(self.core.backend());
        let collection = self.core.collection().to_string();
        self.core.writer().submit(async move {
            match backend.insert_and_flush(&collection, row).await {
                Ok(()) => tracing::info!(cache_id = %cache_id, "code cache row saved"),
                Err(e) => tracing::warn!(cache_id = %cache_id, error = %e, "code cache save failed"),
            }
        })
    }

    /// Audits a failed hit. The row stays; the audit file is authoritative.
    pub fn record_failure(&self, cache_id: &str, reason: &str) {
        self.failures.record(cache_id, "code", reason);
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
            .map_err(|e| AgentError::failed(format!("code cache invalidate: {e}")))
    }

    /// Pending write-behind jobs (tests and diagnostics).
    pub fn pending_writes(&self) -> usize {
        self.core.writer().pending()
    }

    /// Waits for queued writes to land (tests and session flush).
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.core.writer().drain(timeout).await
    }

    pub async fn shutdown(&self, timeout: Duration) {
        self.core.shutdown(timeout).await;
    }
}
