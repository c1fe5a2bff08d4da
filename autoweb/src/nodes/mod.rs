//! Graph nodes: Observer → Planner → [CacheLookup → (Coder → Executor |
//! Executor)] → Verifier → Observer …, with RAG and ErrorHandler on the side.
//!
//! Every node is a struct holding its collaborators behind `Arc` and
//! implementing [`Node<AgentState>`](crate::graph::Node); routing happens
//! solely through the returned [`Goto`](crate::graph::Goto).

mod cache_lookup;
mod coder;
mod error_handler;
mod executor;
mod observer;
mod planner;
mod rag;
mod verifier;

pub use cache_lookup::CacheLookupNode;
pub use coder::CoderNode;
pub use error_handler::ErrorHandlerNode;
pub use executor::ExecutorNode;
pub use observer::ObserverNode;
pub use planner::PlannerNode;
pub use rag::RagNode;
pub use verifier::VerifierNode;

/// Node ids used in `Goto` routing.
pub mod ids {
    pub const OBSERVER: &str = "Observer";
    pub const PLANNER: &str = "Planner";
    pub const CACHE_LOOKUP: &str = "CacheLookup";
    pub const CODER: &str = "Coder";
    pub const EXECUTOR: &str = "Executor";
    pub const VERIFIER: &str = "Verifier";
    pub const RAG: &str = "Rag";
    pub const ERROR_HANDLER: &str = "ErrorHandler";
}

/// Pipe-joined one-line summary of the accumulated locator strategies, used as
/// the code cache's `locator_info` key.
pub(crate) fn locator_summary(entries: &[crate::state::StrategyEntry]) -> String {
    let mut parts = Vec::new();
    for entry in entries {
        for strategy in &entry.strategies {
            if strategy.locator.is_empty() {
                continue;
            }
            parts.push(format!("{}:{}", strategy.action_suggestion, strategy.locator));
        }
    }
    parts.join(" | ")
}

/// Bullet list of finished steps for prompts; "(none)" placeholder when empty.
pub(crate) fn finished_steps_block(steps: &[String]) -> String {
    if steps.is_empty() {
        return "(none)".to_string();
    }
    steps
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}
