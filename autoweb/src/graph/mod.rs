//! Goto-driven state graph: nodes, runtime config, checkpointing, interrupts.
//!
//! Unlike an edge-declared graph, routing here is entirely dynamic: every node
//! returns a [`Goto`] naming the next node (or [`Goto::End`]). The graph only
//! validates that named nodes exist and enforces a recursion limit. Two
//! interrupt lists (`before` / `after` node ids) pause execution for
//! human-in-the-loop input; a [`Checkpointer`] keyed by `thread_id` makes the
//! pause resumable.

mod checkpointer;
mod compiled;
mod config;
mod error;
mod node;
mod state_graph;

pub use checkpointer::{Checkpoint, CheckpointError, Checkpointer, MemorySaver};
pub use compiled::{CompiledStateGraph, InterruptPoint, Resume, RunOutcome};
pub use config::RunnableConfig;
pub use error::CompilationError;
pub use node::{Goto, Node, Reducible};
pub use state_graph::StateGraph;
