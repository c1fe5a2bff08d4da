//! Typed settings snapshot read from the process environment.
//!
//! Call after [`crate::load_and_apply`] so `.env` / XDG values are visible. Every
//! recognized key has a default; nothing here fails except by returning defaults,
//! so startup stays predictable with a partial environment.

use std::path::PathBuf;

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn var_bool(key: &str, default: bool) -> bool {
    match var(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

fn var_f32(key: &str, default: f32) -> f32 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn var_u32(key: &str, default: u32) -> u32 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn var_u64(key: &str, default: u64) -> u64 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn var_list(key: &str, default: &[&str]) -> Vec<String> {
    match var(key) {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Code-cache knobs (`CODE_CACHE_*`).
#[derive(Clone, Debug)]
pub struct CodeCacheSettings {
    pub enabled: bool,
    pub collection: String,
    /// Minimum normalized hybrid score for a usable hit.
    pub threshold: f32,
    /// Re-search score above which a save is considered a duplicate and skipped.
    pub duplicate_threshold: f32,
    pub top_k: usize,
    /// Ranker weights in `(goal, locator, user_task, url)` order; normalized downstream.
    pub weights: [f32; 4],
}

/// DOM-cache knobs (`DOM_CACHE_*`).
#[derive(Clone, Debug)]
pub struct DomCacheSettings {
    pub enabled: bool,
    pub collection: String,
    pub threshold: f32,
    pub top_k: usize,
    pub ttl_hours: u64,
    /// Hard floor on task-intent cosine similarity, independent of the hybrid score.
    pub task_min_sim: f32,
    /// Ranker weights in `(url, dom, task)` order; normalized downstream.
    pub weights: [f32; 3],
}

/// Field-registry backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryBackendKind {
    Json,
    Redis,
}

#[derive(Clone, Debug)]
pub struct RegistrySettings {
    pub backend: RegistryBackendKind,
    pub path: PathBuf,
    pub redis_url: String,
}

/// Configurable keyword lists driving task-continuity and RAG routing.
#[derive(Clone, Debug)]
pub struct KeywordSettings {
    /// New input containing any of these continues the current task.
    pub continuation: Vec<String>,
    /// User task containing any of these wants the result stored in the knowledge base.
    pub rag_goal: Vec<String>,
    /// Plan text containing any of these is a store-to-KB step.
    pub rag_store: Vec<String>,
    /// Plan text containing any of these is a KB question.
    pub rag_query: Vec<String>,
    /// A finished step containing this marker means the KB write already happened.
    pub rag_done_marker: String,
}

/// Full typed configuration for one engine instance.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Vector store endpoint; `memory://` selects the in-process backend.
    pub milvus_uri: String,

    pub model_name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,

    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub embedding_base_url: Option<String>,

    pub code_cache: CodeCacheSettings,
    pub dom_cache: DomCacheSettings,
    pub registry: RegistrySettings,
    pub keywords: KeywordSettings,

    pub kb_collection: String,

    pub headless_mode: bool,
    pub browser_user_data_dir: Option<PathBuf>,

    pub output_dir: PathBuf,
    pub logs_dir: PathBuf,

    /// Command line for the external code runner, whitespace-split.
    pub runner_cmd: Vec<String>,
    pub exec_timeout_secs: u64,

    /// Plan-iteration ceiling per task.
    pub max_loops: u32,
    pub llm_timeout_secs: u64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            milvus_uri: var_or("MILVUS_URI", "http://localhost:19530"),

            model_name: var_or("MODEL_NAME", "gpt-4o-mini"),
            api_key: var("API_KEY"),
            base_url: var("BASE_URL"),

            embedding_model: var_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_api_key: var("EMBEDDING_API_KEY"),
            embedding_base_url: var("EMBEDDING_BASE_URL"),

            code_cache: CodeCacheSettings {
                enabled: var_bool("CODE_CACHE_ENABLED", true),
                collection: var_or("CODE_CACHE_COLLECTION", "code_cache"),
                threshold: var_f32("CODE_CACHE_THRESHOLD", 0.90).clamp(0.0, 1.0),
                duplicate_threshold: var_f32("CODE_CACHE_DUPLICATE_THRESHOLD", 0.90)
                    .clamp(0.0, 1.0),
                top_k: var_u32("CODE_CACHE_TOP_K", 3) as usize,
                weights: [
                    var_f32("CODE_CACHE_WEIGHT_GOAL", 0.6),
                    var_f32("CODE_CACHE_WEIGHT_LOCATOR", 0.2),
                    var_f32("CODE_CACHE_WEIGHT_USER_TASK", 0.1),
                    var_f32("CODE_CACHE_WEIGHT_URL", 0.1),
                ],
            },
            dom_cache: DomCacheSettings {
                enabled: var_bool("DOM_CACHE_ENABLED", true),
                collection: var_or("DOM_CACHE_COLLECTION", "dom_cache"),
                threshold: var_f32("DOM_CACHE_THRESHOLD", 0.90).clamp(0.0, 1.0),
                top_k: var_u32("DOM_CACHE_TOP_K", 3) as usize,
                ttl_hours: var_u64("DOM_CACHE_TTL_HOURS", 168).max(1),
                task_min_sim: var_f32("DOM_CACHE_TASK_MIN_SIM", 0.8).clamp(0.0, 1.0),
                weights: [
                    var_f32("DOM_CACHE_WEIGHT_URL", 0.2),
                    var_f32("DOM_CACHE_WEIGHT_DOM", 0.7),
                    var_f32("DOM_CACHE_WEIGHT_TASK", 0.1),
                ],
            },
            registry: RegistrySettings {
                backend: match var_or("FIELD_REGISTRY_BACKEND", "json").to_ascii_lowercase().as_str()
                {
                    "redis" => RegistryBackendKind::Redis,
                    _ => RegistryBackendKind::Json,
                },
                path: PathBuf::from(var_or("FIELD_REGISTRY_PATH", "data/field_registry.json")),
                redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            },
            keywords: KeywordSettings {
                continuation: var_list(
                    "CONTINUATION_KEYWORDS",
                    &["continue", "next page", "more", "keep going", "same page"],
                ),
                rag_goal: var_list(
                    "RAG_GOAL_KEYWORDS",
                    &["knowledge base", "store in kb", "save to kb"],
                ),
                rag_store: var_list(
                    "RAG_STORE_KEYWORDS",
                    &["store in knowledge base", "save to knowledge base", "ingest"],
                ),
                rag_query: var_list(
                    "RAG_QUERY_KEYWORDS",
                    &["ask knowledge base", "query knowledge base", "look up in kb"],
                ),
                rag_done_marker: var_or("RAG_DONE_MARKER", "knowledge base updated"),
            },

            kb_collection: var_or("KNOWLEDGE_COLLECTION", "spider_knowledge_base"),

            headless_mode: var_bool("HEADLESS_MODE", true),
            browser_user_data_dir: var("BROWSER_USER_DATA_DIR").map(PathBuf::from),

            output_dir: PathBuf::from(var_or("OUTPUT_DIR", "output")),
            logs_dir: PathBuf::from(var_or("LOGS_DIR", "logs")),

            runner_cmd: var_or("RUNNER_CMD", "python runner.py")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            exec_timeout_secs: var_u64("EXEC_TIMEOUT_SECS", 120),

            max_loops: var_u32("MAX_LOOPS", 10),
            llm_timeout_secs: var_u64("LLM_TIMEOUT_SECS", 60),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}
