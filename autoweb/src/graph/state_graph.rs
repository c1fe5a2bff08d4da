//! State graph builder: register nodes, pick the entry, configure interrupts,
//! then `compile` (optionally with a checkpointer) into a runnable graph.

use std::collections::HashMap;
use std::sync::Arc;

use super::checkpointer::Checkpointer;
use super::compiled::CompiledStateGraph;
use super::error::CompilationError;
use super::node::{Node, Reducible};

/// Goto-routed graph under construction.
///
/// Routing is dynamic (each node returns the next id), so building is just node
/// registration plus entry/interrupt declarations. `compile` validates ids.
pub struct StateGraph<S: Reducible> {
    nodes: HashMap<&'static str, Arc<dyn Node<S>>>,
    entry: Option<&'static str>,
    interrupt_before: Vec<&'static str>,
    interrupt_after: Vec<&'static str>,
    duplicates: Vec<&'static str>,
}

impl<S: Reducible> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Reducible> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            entry: None,
            interrupt_before: Vec::new(),
            interrupt_after: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    /// Registers a node under its own id. Duplicate ids fail at compile time.
    pub fn add_node(&mut self, node: Arc<dyn Node<S>>) -> &mut Self {
        if self.nodes.insert(node.id(), node.clone()).is_some() {
            self.duplicates.push(node.id());
        }
        self
    }

    /// Declares the entry node for fresh runs.
    pub fn set_entry(&mut self, id: &'static str) -> &mut Self {
        self.entry = Some(id);
        self
    }

    /// Pauses the run *before* executing any of these nodes.
    pub fn interrupt_before(&mut self, ids: &[&'static str]) -> &mut Self {
        self.interrupt_before.extend_from_slice(ids);
        self
    }

    /// Pauses the run *after* executing any of these nodes.
    pub fn interrupt_after(&mut self, ids: &[&'static str]) -> &mut Self {
        self.interrupt_after.extend_from_slice(ids);
        self
    }

    fn validate(&self) -> Result<&'static str, CompilationError> {
        if let Some(id) = self.duplicates.first() {
            return Err(CompilationError::DuplicateNode(id.to_string()));
        }
        let entry = self.entry.ok_or(CompilationError::MissingEntry)?;
        if !self.nodes.contains_key(entry) {
            return Err(CompilationError::EntryNotFound(entry.to_string()));
        }
        for id in self.interrupt_before.iter().chain(&self.interrupt_after) {
            if !self.nodes.contains_key(id) {
                return Err(CompilationError::InterruptUnknownNode(id.to_string()));
            }
        }
        Ok(entry)
    }

    /// Builds the runnable graph without persistence.
    pub fn compile(self) -> Result<CompiledStateGraph<S>, CompilationError> {
        let entry = self.validate()?;
        Ok(CompiledStateGraph::new(
            self.nodes,
            entry,
            self.interrupt_before,
            self.interrupt_after,
            None,
        ))
    }

    /// Builds the runnable graph with a checkpointer; runs with a `thread_id`
    /// persist their state and can resume.
    pub fn compile_with_checkpointer(
        self,
        checkpointer: Arc<dyn Checkpointer<S>>,
    ) -> Result<CompiledStateGraph<S>, CompilationError> {
        let entry = self.validate()?;
        Ok(CompiledStateGraph::new(
            self.nodes,
            entry,
            self.interrupt_before,
            self.interrupt_after,
            Some(checkpointer),
        ))
    }
}
