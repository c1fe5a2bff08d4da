//! Compiled graph runtime: goto loop, interrupts, checkpointing, resume.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AgentError;

use super::checkpointer::{Checkpoint, Checkpointer};
use super::config::RunnableConfig;
use super::node::{Goto, Node, Reducible};

/// Which side of a node the run paused on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptPoint {
    /// Paused before executing `node`; resuming runs it.
    Before,
    /// Paused after executing `node`; resuming continues at the checkpointed next node.
    After,
}

/// Result of one `invoke`/`resume` call.
#[derive(Clone, Debug)]
pub enum RunOutcome<S> {
    /// The run reached `Goto::End`.
    Complete(S),
    /// The run paused at an interrupt; state is checkpointed under the thread id.
    Interrupted {
        state: S,
        /// Node id the interrupt is attached to.
        node: &'static str,
        point: InterruptPoint,
        /// Node that will execute when resumed.
        next_node: &'static str,
    },
}

/// How to continue a suspended run.
#[derive(Clone, Debug, Default)]
pub enum Resume {
    /// Proceed with the checkpointed next node.
    #[default]
    Continue,
    /// Override the next node (e.g. force a replan).
    Goto(&'static str),
    /// Finish the run immediately with the checkpointed state.
    Finish,
}

/// Executable goto-routed graph.
pub struct CompiledStateGraph<S: Reducible> {
    nodes: HashMap<&'static str, Arc<dyn Node<S>>>,
    entry: &'static str,
    interrupt_before: Vec<&'static str>,
    interrupt_after: Vec<&'static str>,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
}

impl<S: Reducible> CompiledStateGraph<S> {
    pub(super) fn new(
        nodes: HashMap<&'static str, Arc<dyn Node<S>>>,
        entry: &'static str,
        interrupt_before: Vec<&'static str>,
        interrupt_after: Vec<&'static str>,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Self {
        Self {
            nodes,
            entry,
            interrupt_before,
            interrupt_after,
            checkpointer,
        }
    }

    /// Entry node id for fresh runs.
    pub fn entry(&self) -> &'static str {
        self.entry
    }

    /// Loads the checkpoint for `config.thread_id`, if any.
    pub async fn get_checkpoint(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<Checkpoint<S>>, AgentError> {
        let (Some(cp), Some(thread_id)) = (&self.checkpointer, &config.thread_id) else {
            return Ok(None);
        };
        cp.get(thread_id)
            .await
            .map_err(|e| AgentError::failed(format!("checkpoint load: {e}")))
    }

    /// Applies a manual update to the checkpointed state (human-in-the-loop edits).
    pub async fn update_state(
        &self,
        config: &RunnableConfig,
        update: S::Update,
    ) -> Result<(), AgentError> {
        let (Some(cp), Some(thread_id)) = (&self.checkpointer, &config.thread_id) else {
            return Err(AgentError::MissingDependency("checkpointer/thread_id".into()));
        };
        let mut checkpoint = cp
            .get(thread_id)
            .await
            .map_err(|e| AgentError::failed(format!("checkpoint load: {e}")))?
            .ok_or_else(|| AgentError::failed(format!("no checkpoint for thread {thread_id}")))?;
        checkpoint.state.apply(update);
        cp.put(thread_id, checkpoint)
            .await
            .map_err(|e| AgentError::failed(format!("checkpoint save: {e}")))
    }

    /// Drops the thread's checkpoint.
    pub async fn reset(&self, config: &RunnableConfig) -> Result<(), AgentError> {
        if let (Some(cp), Some(thread_id)) = (&self.checkpointer, &config.thread_id) {
            cp.delete(thread_id)
                .await
                .map_err(|e| AgentError::failed(format!("checkpoint delete: {e}")))?;
        }
        Ok(())
    }

    async fn save(
        &self,
        config: &RunnableConfig,
        state: &S,
        next_node: Option<&'static str>,
    ) -> Result<(), AgentError> {
        if let (Some(cp), Some(thread_id)) = (&self.checkpointer, &config.thread_id) {
            cp.put(
                thread_id,
                Checkpoint {
                    state: state.clone(),
                    next_node,
                },
            )
            .await
            .map_err(|e| AgentError::failed(format!("checkpoint save: {e}")))?;
        }
        Ok(())
    }

    /// Runs from the entry node with a fresh state.
    pub async fn invoke(
        &self,
        state: S,
        config: &RunnableConfig,
    ) -> Result<RunOutcome<S>, AgentError> {
        self.run_from(state, self.entry, config, true).await
    }

    /// Resumes a suspended run from its checkpoint.
    pub async fn resume(
        &self,
        config: &RunnableConfig,
        how: Resume,
    ) -> Result<RunOutcome<S>, AgentError> {
        let checkpoint = self
            .get_checkpoint(config)
            .await?
            .ok_or_else(|| AgentError::failed("nothing to resume: no checkpoint"))?;
        let next = match how {
            Resume::Continue => checkpoint
                .next_node
                .ok_or_else(|| AgentError::failed("nothing to resume: run already finished"))?,
            Resume::Goto(node) => node,
            Resume::Finish => {
                self.save(config, &checkpoint.state, None).await?;
                return Ok(RunOutcome::Complete(checkpoint.state));
            }
        };
        // Resuming past a before-interrupt must not re-trigger it on the same node.
        self.run_from(checkpoint.state, next, config, false).await
    }

    async fn run_from(
        &self,
        mut state: S,
        mut current: &'static str,
        config: &RunnableConfig,
        mut honor_before: bool,
    ) -> Result<RunOutcome<S>, AgentError> {
        let limit = config.recursion_limit();
        for _ in 0..limit {
            let node = self
                .nodes
                .get(current)
                .ok_or_else(|| AgentError::failed(format!("goto unknown node: {current}")))?;

            if honor_before && self.interrupt_before.contains(&current) {
                self.save(config, &state, Some(current)).await?;
                tracing::debug!(node = current, "interrupt before node");
                return Ok(RunOutcome::Interrupted {
                    state,
                    node: current,
                    point: InterruptPoint::Before,
                    next_node: current,
                });
            }
            honor_before = true;

            tracing::debug!(node = current, "node enter");
            let (update, goto) = node.run(&state, config).await?;
            state.apply(update);
            tracing::debug!(node = current, next = ?goto, "node exit");

            let next = match goto {
                Goto::End => {
                    self.save(config, &state, None).await?;
                    return Ok(RunOutcome::Complete(state));
                }
                Goto::Node(id) => id,
            };

            if self.interrupt_after.contains(&current) {
                self.save(config, &state, Some(next)).await?;
                tracing::debug!(node = current, next, "interrupt after node");
                return Ok(RunOutcome::Interrupted {
                    state,
                    node: current,
                    point: InterruptPoint::After,
                    next_node: next,
                });
            }

            current = next;
        }
        Err(AgentError::RecursionLimit(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemorySaver, StateGraph};
    use async_trait::async_trait;

    #[derive(Clone, Debug, Default)]
    struct Trace {
        visits: Vec<&'static str>,
    }

    impl Reducible for Trace {
        type Update = Vec<&'static str>;
        fn apply(&mut self, update: Vec<&'static str>) {
            self.visits.extend(update);
        }
    }

    struct Step {
        id: &'static str,
        goto: Goto,
    }

    #[async_trait]
    impl Node<Trace> for Step {
        fn id(&self) -> &'static str {
            self.id
        }
        async fn run(
            &self,
            _: &Trace,
            _: &RunnableConfig,
        ) -> Result<(Vec<&'static str>, Goto), AgentError> {
            Ok((vec![self.id], self.goto.clone()))
        }
    }

    fn chain() -> StateGraph<Trace> {
        let mut graph = StateGraph::new();
        graph.add_node(Arc::new(Step { id: "a", goto: Goto::Node("b") }));
        graph.add_node(Arc::new(Step { id: "b", goto: Goto::Node("c") }));
        graph.add_node(Arc::new(Step { id: "c", goto: Goto::End }));
        graph.set_entry("a");
        graph
    }

    /// **Scenario**: goto routing visits nodes in order and ends.
    #[tokio::test]
    async fn invoke_follows_goto_chain() {
        let graph = chain().compile().unwrap();
        let out = graph.invoke(Trace::default(), &RunnableConfig::default()).await.unwrap();
        match out {
            RunOutcome::Complete(t) => assert_eq!(t.visits, vec!["a", "b", "c"]),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    /// **Scenario**: a before-interrupt pauses without running the node, and
    /// Resume::Continue runs it exactly once.
    #[tokio::test]
    async fn before_interrupt_pauses_and_resumes() {
        let mut graph = chain();
        graph.interrupt_before(&["b"]);
        let graph = graph
            .compile_with_checkpointer(Arc::new(MemorySaver::new()))
            .unwrap();
        let config = RunnableConfig::new("t1");

        let out = graph.invoke(Trace::default(), &config).await.unwrap();
        let RunOutcome::Interrupted { state, node, point, next_node } = out else {
            panic!("expected interrupt");
        };
        assert_eq!(node, "b");
        assert_eq!(point, InterruptPoint::Before);
        assert_eq!(next_node, "b");
        assert_eq!(state.visits, vec!["a"], "b must not have run yet");

        let out = graph.resume(&config, Resume::Continue).await.unwrap();
        match out {
            RunOutcome::Complete(t) => assert_eq!(t.visits, vec!["a", "b", "c"]),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    /// **Scenario**: an after-interrupt pauses with the goto target checkpointed;
    /// Resume::Goto overrides it.
    #[tokio::test]
    async fn after_interrupt_allows_goto_override() {
        let mut graph = chain();
        graph.interrupt_after(&["a"]);
        let graph = graph
            .compile_with_checkpointer(Arc::new(MemorySaver::new()))
            .unwrap();
        let config = RunnableConfig::new("t2");

        let out = graph.invoke(Trace::default(), &config).await.unwrap();
        let RunOutcome::Interrupted { node, point, next_node, .. } = out else {
            panic!("expected interrupt");
        };
        assert_eq!((node, point, next_node), ("a", InterruptPoint::After, "b"));

        // Skip b entirely.
        let out = graph.resume(&config, Resume::Goto("c")).await.unwrap();
        match out {
            RunOutcome::Complete(t) => assert_eq!(t.visits, vec!["a", "c"]),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    /// **Scenario**: update_state mutates the checkpoint seen by resume.
    #[tokio::test]
    async fn update_state_between_interrupts() {
        let mut graph = chain();
        graph.interrupt_before(&["c"]);
        let graph = graph
            .compile_with_checkpointer(Arc::new(MemorySaver::new()))
            .unwrap();
        let config = RunnableConfig::new("t3");

        let _ = graph.invoke(Trace::default(), &config).await.unwrap();
        graph.update_state(&config, vec!["manual"]).await.unwrap();
        let out = graph.resume(&config, Resume::Continue).await.unwrap();
        match out {
            RunOutcome::Complete(t) => assert_eq!(t.visits, vec!["a", "b", "manual", "c"]),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    /// **Scenario**: a cycle without End hits the recursion limit.
    #[tokio::test]
    async fn recursion_limit_guards_cycles() {
        let mut graph = StateGraph::new();
        graph.add_node(Arc::new(Step { id: "x", goto: Goto::Node("x") }));
        graph.set_entry("x");
        let graph = graph.compile().unwrap();
        let config = RunnableConfig { recursion_limit: 5, ..Default::default() };
        let err = graph.invoke(Trace::default(), &config).await.unwrap_err();
        assert!(matches!(err, AgentError::RecursionLimit(5)));
    }
}
