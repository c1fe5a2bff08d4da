//! Per-run configuration passed to every node.

use std::sync::Arc;

use crate::browser::Tab;

/// Run-scoped configuration: thread identity, loop bound, and the browser tab
/// owned by the session (never by nodes).
#[derive(Clone, Default)]
pub struct RunnableConfig {
    /// Conversation/thread id for checkpointing; `None` disables persistence.
    pub thread_id: Option<String>,
    /// Upper bound on node transitions in one `invoke`; 0 means the default (50).
    pub recursion_limit: usize,
    /// The active browser tab, shared with Observer/Executor through config.
    pub tab: Option<Arc<dyn Tab>>,
}

impl RunnableConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Self::default()
        }
    }

    pub fn with_tab(mut self, tab: Arc<dyn Tab>) -> Self {
        self.tab = Some(tab);
        self
    }

    pub fn recursion_limit(&self) -> usize {
        if self.recursion_limit == 0 {
            50
        } else {
            self.recursion_limit
        }
    }
}

impl std::fmt::Debug for RunnableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableConfig")
            .field("thread_id", &self.thread_id)
            .field("recursion_limit", &self.recursion_limit)
            .field("tab", &self.tab.is_some())
            .finish()
    }
}
