//! Graph node trait: one step over the shared state.
//!
//! A node receives the current state snapshot plus the run config and returns a
//! partial update together with the routing decision.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::AgentError;

use super::RunnableConfig;

/// Routing decision returned by a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Goto {
    /// Jump to the node with this id.
    Node(&'static str),
    /// Stop the run.
    End,
}

/// A state type that can merge partial updates.
///
/// Implemented by `AgentState` over `StateUpdate`; the graph runtime is generic
/// over it so reducer semantics stay with the state, not the runtime.
pub trait Reducible: Clone + Send + Sync + Debug + 'static {
    type Update: Send + 'static;

    fn apply(&mut self, update: Self::Update);
}

/// One step in a graph: `(state, config) -> (update, goto)`.
///
/// Nodes are pure over the snapshot they receive; all mutation happens through
/// the returned update, serialized by the runtime.
#[async_trait]
pub trait Node<S: Reducible>: Send + Sync {
    /// Node id; must be unique within a graph.
    fn id(&self) -> &'static str;

    /// One step: read state, return the partial update and the next node.
    async fn run(
        &self,
        state: &S,
        config: &RunnableConfig,
    ) -> Result<(S::Update, Goto), AgentError>;
}
