//! Engine: the composition root.
//!
//! Owns every long-lived collaborator (vector backend, embedder, LLM, caches,
//! KB writer, runner), wires the node graph with its two interrupt points, and
//! carries the explicit `start`/`shutdown` lifecycle that drains background
//! writers on exit — no ambient hooks.

use std::sync::Arc;
use std::time::Duration;

use env_config::{RegistryBackendKind, Settings};

use crate::cache::{CodeCacheManager, DomCacheManager, FailureLog};
use crate::embedding::{CachedEmbedder, Embedder, MockEmbedder, OpenAIEmbedder};
use crate::error::AgentError;
use crate::graph::{CompiledStateGraph, MemorySaver, StateGraph};
use crate::kb::{FieldRegistry, JsonFileStore, KbQuery, KnowledgeWriter, RedisStore, RegistryStore};
use crate::llm::{ChatOpenAI, LlmClient};
use crate::nodes::{
    ids, CacheLookupNode, CoderNode, ErrorHandlerNode, ExecutorNode, ObserverNode, PlannerNode,
    RagNode, VerifierNode,
};
use crate::runner::{CodeRunner, ProcessRunner};
use crate::state::AgentState;
use crate::vector::{InMemoryBackend, MilvusClient, VectorBackend};

/// Overridable collaborators for tests and embedding in other hosts.
#[derive(Default)]
pub struct EngineOverrides {
    pub backend: Option<Arc<dyn VectorBackend>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub runner: Option<Arc<dyn CodeRunner>>,
}

/// One process-wide engine instance.
pub struct Engine {
    settings: Settings,
    graph: Arc<CompiledStateGraph<AgentState>>,
    code_cache: Arc<CodeCacheManager>,
    dom_cache: Arc<DomCacheManager>,
    kb_writer: Arc<KnowledgeWriter>,
    kb_query: Arc<KbQuery>,
}

impl Engine {
    /// Builds the engine from settings, with optional collaborator overrides.
    pub fn build(settings: Settings, overrides: EngineOverrides) -> Result<Self, AgentError> {
        let backend: Arc<dyn VectorBackend> = match overrides.backend {
            Some(backend) => backend,
            None if settings.milvus_uri.starts_with("memory://") => {
                Arc::new(InMemoryBackend::new())
            }
            None => Arc::new(MilvusClient::new(&settings.milvus_uri)),
        };

        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(match overrides.embedder {
            Some(embedder) => embedder,
            None if settings.milvus_uri.starts_with("memory://") => Arc::new(MockEmbedder::new()),
            None => Arc::new(OpenAIEmbedder::new(
                &settings.embedding_model,
                settings.embedding_api_key.as_deref(),
                settings.embedding_base_url.as_deref(),
            )),
        }));

        let llm: Arc<dyn LlmClient> = match overrides.llm {
            Some(llm) => llm,
            None => Arc::new(
                ChatOpenAI::new(
                    &settings.model_name,
                    settings.api_key.as_deref(),
                    settings.base_url.as_deref(),
                )
                .with_timeout(Duration::from_secs(settings.llm_timeout_secs)),
            ),
        };

        let runner: Arc<dyn CodeRunner> = match overrides.runner {
            Some(runner) => runner,
            None => Arc::new(
                ProcessRunner::new(
                    settings.runner_cmd.clone(),
                    Duration::from_secs(settings.exec_timeout_secs),
                )
                .map_err(|e| AgentError::failed(format!("runner: {e}")))?,
            ),
        };

        let failures = Arc::new(FailureLog::new(
            settings.output_dir.join("cache_failures.jsonl"),
        ));

        let code_cache = Arc::new(CodeCacheManager::new(
            Arc::clone(&backend),
            Arc::clone(&embedder),
            settings.code_cache.collection.clone(),
            &settings.code_cache.weights,
            settings.code_cache.threshold,
            settings.code_cache.duplicate_threshold,
            settings.code_cache.top_k,
            Arc::clone(&failures),
        ));
        let dom_cache = Arc::new(DomCacheManager::new(
            Arc::clone(&backend),
            Arc::clone(&embedder),
            settings.dom_cache.collection.clone(),
            &settings.dom_cache.weights,
            settings.dom_cache.threshold,
            settings.dom_cache.task_min_sim,
            settings.dom_cache.ttl_hours,
            settings.dom_cache.top_k,
            failures,
        ));

        let registry_store: Box<dyn RegistryStore> = match settings.registry.backend {
            RegistryBackendKind::Json => Box::new(JsonFileStore::new(&settings.registry.path)),
            RegistryBackendKind::Redis => Box::new(
                RedisStore::new(&settings.registry.redis_url)
                    .map_err(|e| AgentError::failed(format!("field registry: {e}")))?,
            ),
        };
        let registry = Arc::new(FieldRegistry::new(registry_store));

        let kb_writer = Arc::new(KnowledgeWriter::new(
            Arc::clone(&backend),
            Arc::clone(&embedder),
            Arc::clone(&registry),
            settings.kb_collection.clone(),
        ));
        let kb_query = Arc::new(KbQuery::new(
            Arc::clone(&backend),
            Arc::clone(&embedder),
            registry,
            Arc::clone(&llm),
            settings.kb_collection.clone(),
        ));

        let mut graph = StateGraph::new();
        graph.add_node(Arc::new(ObserverNode::new(
            Arc::clone(&llm),
            Arc::clone(&dom_cache),
            settings.dom_cache.enabled,
        )));
        graph.add_node(Arc::new(PlannerNode::new(
            Arc::clone(&llm),
            settings.keywords.clone(),
            settings.max_loops,
        )));
        graph.add_node(Arc::new(CacheLookupNode::new(
            Arc::clone(&code_cache),
            settings.code_cache.enabled,
        )));
        graph.add_node(Arc::new(CoderNode::new(Arc::clone(&llm))));
        graph.add_node(Arc::new(ExecutorNode::new(
            runner,
            Arc::clone(&code_cache),
            settings.logs_dir.join("code_log"),
        )));
        graph.add_node(Arc::new(VerifierNode::new(Arc::clone(&llm))));
        graph.add_node(Arc::new(RagNode::new(
            Arc::clone(&code_cache),
            Arc::clone(&kb_writer),
            Arc::clone(&kb_query),
            settings.output_dir.clone(),
            settings.keywords.rag_done_marker.clone(),
        )));
        graph.add_node(Arc::new(ErrorHandlerNode::new(llm)));
        graph.set_entry(ids::OBSERVER);
        graph.interrupt_before(&[ids::EXECUTOR]);
        graph.interrupt_after(&[ids::VERIFIER]);

        let graph = Arc::new(
            graph
                .compile_with_checkpointer(Arc::new(MemorySaver::new()))
                .map_err(|e| AgentError::failed(format!("graph compile: {e}")))?,
        );

        Ok(Self {
            settings,
            graph,
            code_cache,
            dom_cache,
            kb_writer,
            kb_query,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn graph(&self) -> &Arc<CompiledStateGraph<AgentState>> {
        &self.graph
    }

    pub fn code_cache(&self) -> &Arc<CodeCacheManager> {
        &self.code_cache
    }

    pub fn dom_cache(&self) -> &Arc<DomCacheManager> {
        &self.dom_cache
    }

    pub fn kb_writer(&self) -> &Arc<KnowledgeWriter> {
        &self.kb_writer
    }

    pub fn kb_query(&self) -> &Arc<KbQuery> {
        &self.kb_query
    }

    /// Drains every background writer with a bounded wait. Call exactly once,
    /// before the process exits.
    pub async fn shutdown(&self, timeout: Duration) {
        self.kb_writer.shutdown(timeout).await;
        self.code_cache.shutdown(timeout).await;
        self.dom_cache.shutdown(timeout).await;
        tracing::info!("engine shut down");
    }
}
