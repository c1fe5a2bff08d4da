//! Agent execution error types.
//!
//! Used by `Node::run` and everything a node calls into. Errors are reified into
//! state at node boundaries; only host-level failures escape as `AgentError`.

use thiserror::Error;

/// Agent execution error.
///
/// Returned by `Node::run` when a step fails in a way the graph cannot route
/// around. Recoverable conditions (syntax errors, locator misses, cache
/// poisoning) never surface here; they become state updates instead.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Execution failed with a message (e.g. LLM call failed, backend down).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A run was started without the collaborator it needs (e.g. no tab in config).
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Graph recursion limit reached without hitting a terminal node.
    #[error("recursion limit {0} reached")]
    RecursionLimit(usize),
}

impl AgentError {
    /// Shorthand for the common case.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }
}
