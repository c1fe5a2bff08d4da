//! Verifier node: judge the executed step.
//!
//! A deterministic fatal-keyword scan short-circuits the LLM; otherwise the
//! model judges the log tail against the plan. Success on freshly generated,
//! non-trivial code detours through the RAG node so the program gets cached.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::is_navigation_code;
use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::prompts;
use crate::state::{AgentState, CodeSource, Field, RagTask, StateUpdate, VerificationResult};

use super::ids;

/// Deterministic failure markers scanned case-insensitively over the log.
const FATAL_KEYWORDS: &[&str] = &[
    "runtime error:",
    "traceback",
    "element not found",
    "timeout",
    "execution failed",
    "critical",
];

const LOG_TAIL: usize = 2000;

pub struct VerifierNode {
    llm: Arc<dyn LlmClient>,
}

impl VerifierNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn parse_summary(content: &str) -> String {
        content
            .lines()
            .find_map(|line| line.strip_prefix("Summary:"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "Step executed.".to_string())
    }
}

fn log_tail(log: &str) -> String {
    let chars: Vec<char> = log.chars().collect();
    if chars.len() <= LOG_TAIL {
        return log.to_string();
    }
    chars[chars.len() - LOG_TAIL..].iter().collect()
}

#[async_trait]
impl Node<AgentState> for VerifierNode {
    fn id(&self) -> &'static str {
        ids::VERIFIER
    }

    async fn run(
        &self,
        state: &AgentState,
        _config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let log = state.execution_log.clone().unwrap_or_default();
        let plan = state.plan.clone().unwrap_or_default();
        let from_cache = state.code_source == Some(CodeSource::Cache);
        let mut update = StateUpdate::new();

        // Fast path: a fatal marker in the log is a fail, no model needed.
        let lower = log.to_lowercase();
        if let Some(keyword) = FATAL_KEYWORDS.iter().find(|k| lower.contains(*k)) {
            tracing::info!(keyword = *keyword, "deterministic verification fail");
            update.verification_result = Field::Set(Some(VerificationResult {
                is_success: false,
                is_done: false,
                summary: format!("Fatal marker in execution log: {keyword}"),
            }));
            update = update.append_reflection(format!("Step failed: {plan}. Error: {keyword}"));
            return Ok(if from_cache {
                update.cache_failed_this_round = Field::Set(true);
                (update, Goto::Node(ids::PLANNER))
            } else {
                (update, Goto::Node(ids::OBSERVER))
            });
        }

        let prompt = prompts::verifier_prompt(
            &state.user_task,
            &plan,
            &state.current_url,
            &log_tail(&log),
        );
        let response = self.llm.invoke(&[Message::user(prompt)]).await?;
        let content = response.content;

        let is_success = content.contains("Status: STEP_SUCCESS");
        let is_done = content.contains("TaskDone: YES");
        let summary = Self::parse_summary(&content);

        update.verification_result = Field::Set(Some(VerificationResult {
            is_success,
            is_done,
            summary: summary.clone(),
        }));

        if is_success {
            tracing::info!(summary = %summary, "step verified");
            update = update.append_finished_step(summary);
            let code = state.generated_code.as_deref().unwrap_or_default();
            if !from_cache && !is_navigation_code(code) {
                // Freshly generated, non-trivial code is worth caching.
                update.rag_task_type = Field::Set(Some(RagTask::StoreCode));
                return Ok((update, Goto::Node(ids::RAG)));
            }
            Ok((update, Goto::Node(ids::OBSERVER)))
        } else {
            tracing::info!(summary = %summary, "step rejected");
            update = update.append_reflection(format!("Step failed: {summary}"));
            if from_cache {
                update.cache_failed_this_round = Field::Set(true);
                Ok((update, Goto::Node(ids::PLANNER)))
            } else {
                Ok((update, Goto::Node(ids::OBSERVER)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn verified_state(log: &str, source: CodeSource) -> AgentState {
        let mut state = AgentState::new("scrape the list");
        state.current_url = "https://site.com/x".into();
        state.plan = Some("1. Extract rows".into());
        state.execution_log = Some(log.into());
        state.generated_code = Some(
            "rows = tab.query_all('.r')\nfor r in rows:\n    results.append(r.text)\nsave_data(results, 'out.json')\nn = len(rows)".into(),
        );
        state.code_source = Some(source);
        state
    }

    /// **Scenario**: a fatal keyword skips the LLM; non-cache routes to
    /// Observer with a reflection.
    #[tokio::test]
    async fn fatal_fast_path() {
        let llm = Arc::new(MockLlm::new(["unused"]));
        let node = VerifierNode::new(Arc::clone(&llm) as Arc<dyn LlmClient>);
        let state = verified_state("Traceback (most recent call last): boom", CodeSource::Llm);

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::OBSERVER));
        assert!(update.reflections.is_some());
        assert!(llm.prompts.lock().unwrap().is_empty(), "fast path must skip the llm");
        assert!(matches!(
            update.verification_result,
            Field::Set(Some(ref v)) if !v.is_success
        ));
    }

    /// **Scenario**: a fatal keyword on cached code trips the breaker and
    /// returns to the Planner.
    #[tokio::test]
    async fn fatal_on_cache_trips_breaker() {
        let node = VerifierNode::new(Arc::new(MockLlm::new(["unused"])));
        let state = verified_state("execution failed midway", CodeSource::Cache);

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        assert_eq!(update.cache_failed_this_round, Field::Set(true));
    }

    /// **Scenario**: LLM success on fresh non-trivial code detours to RAG for
    /// code caching, appending the finished step.
    #[tokio::test]
    async fn success_detours_to_store_code() {
        let node = VerifierNode::new(Arc::new(MockLlm::new([
            "Status: STEP_SUCCESS\nTaskDone: NO\nSummary: Extracted 20 rows.",
        ])));
        let state = verified_state("rows printed fine", CodeSource::Llm);

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::RAG));
        assert_eq!(update.rag_task_type, Field::Set(Some(RagTask::StoreCode)));
        assert!(matches!(
            update.finished_steps,
            Some(crate::state::ListPatch::Append(ref s)) if s[0] == "Extracted 20 rows."
        ));
    }

    /// **Scenario**: success on cached code skips the store detour.
    #[tokio::test]
    async fn success_on_cache_goes_to_observer() {
        let node = VerifierNode::new(Arc::new(MockLlm::new([
            "Status: STEP_SUCCESS\nTaskDone: NO\nSummary: Reused cached step.",
        ])));
        let state = verified_state("fine", CodeSource::Cache);

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::OBSERVER));
        assert_eq!(update.rag_task_type, Field::Keep);
    }

    /// **Scenario**: success on navigation-only code also skips the detour.
    #[tokio::test]
    async fn success_on_navigation_code_goes_to_observer() {
        let node = VerifierNode::new(Arc::new(MockLlm::new([
            "Status: STEP_SUCCESS\nTaskDone: NO\nSummary: Page opened.",
        ])));
        let mut state = verified_state("opened", CodeSource::Llm);
        state.generated_code = Some("navigate(\"https://example.com/\")".into());

        let (_, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::OBSERVER));
    }

    /// **Scenario**: LLM failure adds a reflection; non-cache re-observes.
    #[tokio::test]
    async fn llm_fail_reflects() {
        let node = VerifierNode::new(Arc::new(MockLlm::new([
            "Status: STEP_FAIL\nTaskDone: NO\nSummary: Nothing was extracted.",
        ])));
        let state = verified_state("no rows found in output", CodeSource::Llm);

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::OBSERVER));
        assert!(matches!(
            update.reflections,
            Some(crate::state::ListPatch::Append(ref r)) if r[0].contains("Nothing was extracted")
        ));
    }
}
