//! # AutoWeb
//!
//! An LLM-driven browser automation engine: perceive the page, plan one atomic
//! step, synthesize (or retrieve) the program for it, execute it out of
//! process, verify the outcome, repeat. Around the loop sit two persistent
//! vector caches and a knowledge-base ingestion pipeline.
//!
//! ## Design principles
//!
//! - **Single state type**: one [`AgentState`] flows through every node; nodes
//!   return partial [`StateUpdate`]s merged by an explicit reducer.
//! - **Goto routing**: nodes name their successor; the graph owns no edges.
//! - **Caches answer before models**: a gated code-cache hit replaces the
//!   Coder for the turn; a gated DOM-cache hit replaces page analysis.
//! - **External collaborators behind traits**: browser tab, code runner,
//!   vector store, LLM, and embeddings are all trait objects with production
//!   and mock implementations.
//! - **Explicit lifecycle**: the [`Engine`] owns every background worker and
//!   drains them in `shutdown`; no ambient exit hooks.
//!
//! ## Main modules
//!
//! - [`graph`]: goto-driven [`StateGraph`]/[`CompiledStateGraph`], interrupts,
//!   [`Checkpointer`] keyed by thread id.
//! - [`state`]: [`AgentState`], [`StateUpdate`], reducer primitives.
//! - [`nodes`]: Observer, Planner, CacheLookup, Coder, Executor, Verifier,
//!   RAG, ErrorHandler.
//! - [`cache`]: [`CodeCacheManager`], [`DomCacheManager`], write-behind queue,
//!   parameter substitution, failure audit.
//! - [`kb`]: [`KnowledgeWriter`], [`FieldRegistry`], [`KbQuery`].
//! - [`vector`]: [`VectorBackend`] gateway ([`MilvusClient`],
//!   [`InMemoryBackend`]), retry, weight normalization.
//! - [`llm`] / [`embedding`]: [`LlmClient`] and [`Embedder`] with OpenAI and
//!   mock implementations.
//! - [`browser`] / [`runner`]: the [`Tab`] and [`CodeRunner`] seams.
//! - [`engine`]: the [`Engine`] composition root.

pub mod browser;
pub mod cache;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod kb;
pub mod llm;
pub mod message;
pub mod nodes;
pub mod prompts;
pub mod runner;
pub mod salvage;
pub mod state;
pub mod toolbox;
pub mod vector;

pub use browser::{capture_dom_skeleton, is_trivial_page, BrowserError, MockTab, Tab};
pub use cache::{
    apply_param_diffs, compact_dom, dom_hash, normalize_url, param_diffs, CodeCacheHit,
    CodeCacheManager, CodeSaveRequest, DomCacheHit, DomCacheManager, FailureLog, ParamDiff,
};
pub use embedding::{CachedEmbedder, Embedder, MockEmbedder, OpenAIEmbedder};
pub use engine::{Engine, EngineOverrides};
pub use error::AgentError;
pub use graph::{
    Checkpoint, CheckpointError, Checkpointer, CompilationError, CompiledStateGraph, Goto,
    InterruptPoint, MemorySaver, Node, Reducible, Resume, RunOutcome, RunnableConfig, StateGraph,
};
pub use kb::{FieldRegistry, KbItem, KbQuery, KnowledgeWriter};
pub use llm::{ChatOpenAI, LlmClient, LlmResponse, MockLlm};
pub use message::Message;
pub use runner::{classify_output, CodeRunner, MockRunner, ProcessRunner, RunRequest};
pub use salvage::{salvage_json, salvage_object_list};
pub use state::{
    AgentState, CodeSource, ErrorClass, Field, ListPatch, LocatorStrategy, ObserverSource,
    RagTask, StateUpdate, StrategyEntry, VerificationResult,
};
pub use toolbox::Toolbox;
pub use vector::{InMemoryBackend, MilvusClient, VectorBackend};
