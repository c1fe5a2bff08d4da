//! Shared agent state and its reducer.
//!
//! One [`AgentState`] record flows through every node. Nodes never mutate it
//! directly; they return a partial [`StateUpdate`] which the graph runtime
//! merges via [`AgentState::apply`]. Scalar fields use [`Field`]
//! (keep-or-set); the three clearable history lists use [`ListPatch`]
//! (clear / append / replace), which is the explicit form of the
//! none-clears / list-extends / other-replaces contract.

mod update;

pub use update::{Field, ListPatch};

use serde::{Deserialize, Serialize};

/// Where the code in `generated_code` came from this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeSource {
    Cache,
    Llm,
}

/// Where the latest locator suggestions came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObserverSource {
    DomCache,
    Llm,
}

/// Classified executor failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Recoverable by regenerating code (bounded micro-loop).
    Syntax,
    /// Element lookup / interaction failure; needs a fresh observation.
    Locator,
    /// Uncaught host-level failure.
    Critical,
}

/// Pending RAG dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RagTask {
    StoreKb,
    StoreCode,
    Qa,
}

/// One locator strategy proposed for the current page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocatorStrategy {
    #[serde(default)]
    pub locator: String,
    #[serde(default)]
    pub action_suggestion: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_locators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opens_new_tab: Option<bool>,
    #[serde(default)]
    pub current_step_reasoning: String,
}

/// A page-context batch of locator strategies, as accumulated by the Observer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StrategyEntry {
    /// Usually the most recent finished step, or "initial page".
    pub page_context: String,
    pub url: String,
    pub strategies: Vec<LocatorStrategy>,
}

/// Verifier judgment for the last executed step.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_success: bool,
    pub is_done: bool,
    pub summary: String,
}

/// The single record passed between nodes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Original user utterance.
    pub user_task: String,
    /// Next atomic step chosen by the Planner.
    pub plan: Option<String>,
    /// Last synthesized program text.
    pub generated_code: Option<String>,
    /// Captured stdout/stderr plus system notes from the last execution.
    pub execution_log: Option<String>,

    /// Observer-produced snapshot.
    pub current_url: String,
    pub dom_skeleton: Option<String>,
    pub dom_hash: Option<String>,

    /// Accumulated page-context locator batches (clearable).
    pub locator_suggestions: Vec<StrategyEntry>,
    /// Ordered step summaries for the current task (clearable).
    pub finished_steps: Vec<String>,
    /// Failure lessons (clearable).
    pub reflections: Vec<String>,

    pub verification_result: Option<VerificationResult>,

    pub error: Option<String>,
    pub error_type: Option<ErrorClass>,

    /// Syntax micro-loop counter; reset on clean execution.
    pub coder_retry_count: u32,

    pub code_source: Option<CodeSource>,
    /// One-turn latch: suppresses cache retrieval after cached code failed.
    pub cache_failed_this_round: bool,
    pub cache_hit_id: Option<String>,

    pub observer_source: Option<ObserverSource>,
    pub dom_cache_hit_id: Option<String>,

    /// Consecutive failed verifications; drives the abandon-approach directive.
    pub step_fail_count: u32,
    /// Plan iterations within the current task.
    pub loop_count: u32,
    pub is_complete: bool,

    pub rag_task_type: Option<RagTask>,
}

impl crate::graph::Reducible for AgentState {
    type Update = StateUpdate;

    fn apply(&mut self, update: StateUpdate) {
        AgentState::apply(self, update);
    }
}

impl AgentState {
    /// Fresh state for a new user input.
    pub fn new(user_task: impl Into<String>) -> Self {
        Self {
            user_task: user_task.into(),
            ..Self::default()
        }
    }

    /// Merges a partial update into the state (the reducer table).
    pub fn apply(&mut self, update: StateUpdate) {
        update.user_task.apply(&mut self.user_task);
        update.plan.apply(&mut self.plan);
        update.generated_code.apply(&mut self.generated_code);
        update.execution_log.apply(&mut self.execution_log);
        update.current_url.apply(&mut self.current_url);
        update.dom_skeleton.apply(&mut self.dom_skeleton);
        update.dom_hash.apply(&mut self.dom_hash);
        if let Some(patch) = update.locator_suggestions {
            patch.apply(&mut self.locator_suggestions);
        }
        if let Some(patch) = update.finished_steps {
            patch.apply(&mut self.finished_steps);
        }
        if let Some(patch) = update.reflections {
            patch.apply(&mut self.reflections);
        }
        update
            .verification_result
            .apply(&mut self.verification_result);
        update.error.apply(&mut self.error);
        update.error_type.apply(&mut self.error_type);
        update.coder_retry_count.apply(&mut self.coder_retry_count);
        update.code_source.apply(&mut self.code_source);
        update
            .cache_failed_this_round
            .apply(&mut self.cache_failed_this_round);
        update.cache_hit_id.apply(&mut self.cache_hit_id);
        update.observer_source.apply(&mut self.observer_source);
        update.dom_cache_hit_id.apply(&mut self.dom_cache_hit_id);
        update.step_fail_count.apply(&mut self.step_fail_count);
        update.loop_count.apply(&mut self.loop_count);
        update.is_complete.apply(&mut self.is_complete);
        update.rag_task_type.apply(&mut self.rag_task_type);
    }
}

/// Partial update returned by a node. Unset fields keep their current value.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub user_task: Field<String>,
    pub plan: Field<Option<String>>,
    pub generated_code: Field<Option<String>>,
    pub execution_log: Field<Option<String>>,
    pub current_url: Field<String>,
    pub dom_skeleton: Field<Option<String>>,
    pub dom_hash: Field<Option<String>>,
    pub locator_suggestions: Option<ListPatch<StrategyEntry>>,
    pub finished_steps: Option<ListPatch<String>>,
    pub reflections: Option<ListPatch<String>>,
    pub verification_result: Field<Option<VerificationResult>>,
    pub error: Field<Option<String>>,
    pub error_type: Field<Option<ErrorClass>>,
    pub coder_retry_count: Field<u32>,
    pub code_source: Field<Option<CodeSource>>,
    pub cache_failed_this_round: Field<bool>,
    pub cache_hit_id: Field<Option<String>>,
    pub observer_source: Field<Option<ObserverSource>>,
    pub dom_cache_hit_id: Field<Option<String>>,
    pub step_fail_count: Field<u32>,
    pub loop_count: Field<u32>,
    pub is_complete: Field<bool>,
    pub rag_task_type: Field<Option<RagTask>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Field::Set(Some(plan.into()));
        self
    }

    pub fn generated_code(mut self, code: impl Into<String>) -> Self {
        self.generated_code = Field::Set(Some(code.into()));
        self
    }

    pub fn execution_log(mut self, log: impl Into<String>) -> Self {
        self.execution_log = Field::Set(Some(log.into()));
        self
    }

    pub fn current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Field::Set(url.into());
        self
    }

    pub fn append_finished_step(mut self, step: impl Into<String>) -> Self {
        self.finished_steps = Some(ListPatch::Append(vec![step.into()]));
        self
    }

    pub fn append_reflection(mut self, reflection: impl Into<String>) -> Self {
        self.reflections = Some(ListPatch::Append(vec![reflection.into()]));
        self
    }

    pub fn error(mut self, error: impl Into<String>, class: ErrorClass) -> Self {
        self.error = Field::Set(Some(error.into()));
        self.error_type = Field::Set(Some(class));
        self
    }

    /// The fresh-task reset: clears everything tied to the previous task and
    /// restarts the loop counter at 1. `user_task` itself is left to the caller.
    pub fn fresh_task_reset(mut self) -> Self {
        self.locator_suggestions = Some(ListPatch::Clear);
        self.finished_steps = Some(ListPatch::Clear);
        self.reflections = Some(ListPatch::Clear);
        self.generated_code = Field::Set(None);
        self.execution_log = Field::Set(None);
        self.verification_result = Field::Set(None);
        self.error = Field::Set(None);
        self.error_type = Field::Set(None);
        self.code_source = Field::Set(None);
        self.cache_failed_this_round = Field::Set(false);
        self.cache_hit_id = Field::Set(None);
        self.observer_source = Field::Set(None);
        self.dom_cache_hit_id = Field::Set(None);
        self.dom_skeleton = Field::Set(None);
        self.dom_hash = Field::Set(None);
        self.coder_retry_count = Field::Set(0);
        self.step_fail_count = Field::Set(0);
        self.loop_count = Field::Set(1);
        self.is_complete = Field::Set(false);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: an empty update leaves the state untouched.
    #[test]
    fn empty_update_is_identity() {
        let mut state = AgentState::new("task");
        state.loop_count = 3;
        state.finished_steps.push("one".into());
        let snapshot = format!("{state:?}");
        state.apply(StateUpdate::new());
        assert_eq!(format!("{state:?}"), snapshot);
    }

    /// **Scenario**: list fields extend on append and empty on clear; scalars replace.
    #[test]
    fn reducer_contract() {
        let mut state = AgentState::new("task");
        state.finished_steps = vec!["a".into()];

        state.apply(StateUpdate::new().append_finished_step("b"));
        assert_eq!(state.finished_steps, vec!["a", "b"]);

        let mut update = StateUpdate::new();
        update.finished_steps = Some(ListPatch::Clear);
        update.loop_count = Field::Set(7);
        state.apply(update);
        assert!(state.finished_steps.is_empty());
        assert_eq!(state.loop_count, 7);

        let mut update = StateUpdate::new();
        update.reflections = Some(ListPatch::Replace(vec!["only".into()]));
        state.apply(update);
        assert_eq!(state.reflections, vec!["only"]);
    }

    /// **Scenario**: the fresh-task reset clears every task-scoped field and
    /// restarts the loop counter at 1.
    #[test]
    fn fresh_task_reset_clears_everything() {
        let mut state = AgentState::new("old task");
        state.finished_steps = vec!["s".into()];
        state.reflections = vec!["r".into()];
        state.locator_suggestions = vec![StrategyEntry::default()];
        state.generated_code = Some("code".into());
        state.execution_log = Some("log".into());
        state.verification_result = Some(VerificationResult::default());
        state.error = Some("e".into());
        state.error_type = Some(ErrorClass::Locator);
        state.code_source = Some(CodeSource::Cache);
        state.cache_failed_this_round = true;
        state.observer_source = Some(ObserverSource::DomCache);
        state.dom_cache_hit_id = Some("id".into());
        state.dom_skeleton = Some("dom".into());
        state.dom_hash = Some("hash".into());
        state.coder_retry_count = 2;
        state.step_fail_count = 2;
        state.loop_count = 9;

        state.apply(StateUpdate::new().fresh_task_reset());

        assert!(state.finished_steps.is_empty());
        assert!(state.reflections.is_empty());
        assert!(state.locator_suggestions.is_empty());
        assert!(state.generated_code.is_none());
        assert!(state.execution_log.is_none());
        assert!(state.verification_result.is_none());
        assert!(state.error.is_none());
        assert!(state.error_type.is_none());
        assert!(state.code_source.is_none());
        assert!(!state.cache_failed_this_round);
        assert!(state.observer_source.is_none());
        assert!(state.dom_cache_hit_id.is_none());
        assert!(state.dom_skeleton.is_none());
        assert!(state.dom_hash.is_none());
        assert_eq!(state.coder_retry_count, 0);
        assert_eq!(state.step_fail_count, 0);
        assert_eq!(state.loop_count, 1);
    }

    /// **Scenario**: AgentState round-trips through serde for checkpointing.
    #[test]
    fn state_serde_roundtrip() {
        let mut state = AgentState::new("task");
        state.code_source = Some(CodeSource::Cache);
        state.rag_task_type = Some(RagTask::StoreKb);
        state.locator_suggestions.push(StrategyEntry {
            page_context: "initial page".into(),
            url: "https://example.com".into(),
            strategies: vec![LocatorStrategy {
                locator: "#btn".into(),
                action_suggestion: "click".into(),
                ..Default::default()
            }],
        });
        let json = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_task, "task");
        assert_eq!(back.code_source, Some(CodeSource::Cache));
        assert_eq!(back.locator_suggestions[0].strategies[0].locator, "#btn");
    }
}
