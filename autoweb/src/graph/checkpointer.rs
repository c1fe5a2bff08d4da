//! Checkpointer trait and the in-memory saver.
//!
//! A checkpoint is the full state plus the node the run will execute next (if
//! suspended). Keyed by `thread_id`, so a session can resume across
//! human-in-the-loop interrupts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// Snapshot persisted per thread.
#[derive(Clone, Debug)]
pub struct Checkpoint<S> {
    pub state: S,
    /// Node the suspended run will execute next; `None` when the run finished.
    pub next_node: Option<&'static str>,
}

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("thread_id required")]
    ThreadIdRequired,
    #[error("storage: {0}")]
    Storage(String),
}

/// Saves and loads checkpoints by thread id.
#[async_trait]
pub trait Checkpointer<S: Clone + Send + Sync + 'static>: Send + Sync {
    async fn put(&self, thread_id: &str, checkpoint: Checkpoint<S>) -> Result<(), CheckpointError>;

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, CheckpointError>;

    /// Drops the thread's checkpoint (used by `new`/`reset`).
    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError>;
}

/// In-memory checkpointer; the default for a single-process session.
#[derive(Default)]
pub struct MemorySaver<S> {
    inner: Mutex<HashMap<String, Checkpoint<S>>>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S: Clone + Send + Sync + 'static> Checkpointer<S> for MemorySaver<S> {
    async fn put(&self, thread_id: &str, checkpoint: Checkpoint<S>) -> Result<(), CheckpointError> {
        self.inner
            .lock()
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
            .insert(thread_id.to_string(), checkpoint);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        Ok(self
            .inner
            .lock()
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
            .get(thread_id)
            .cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        self.inner
            .lock()
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
            .remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: put/get/delete round-trip by thread id.
    #[tokio::test]
    async fn memory_saver_roundtrip() {
        let saver: MemorySaver<u32> = MemorySaver::new();
        saver
            .put("t1", Checkpoint { state: 7, next_node: Some("Executor") })
            .await
            .unwrap();
        let cp = saver.get("t1").await.unwrap().unwrap();
        assert_eq!(cp.state, 7);
        assert_eq!(cp.next_node, Some("Executor"));
        assert!(saver.get("t2").await.unwrap().is_none());
        saver.delete("t1").await.unwrap();
        assert!(saver.get("t1").await.unwrap().is_none());
    }
}
