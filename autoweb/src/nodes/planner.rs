//! Planner node: one atomic step per turn, sole terminal authority.
//!
//! Entry handling distinguishes a fresh start on a blank page, a new task on
//! an already-loaded page (continuation vs. fresh-task reset), and the normal
//! iterative step. Termination is intercepted when the user asked for a
//! knowledge-base write that has not happened yet.

use std::sync::Arc;

use async_trait::async_trait;
use env_config::KeywordSettings;

use crate::browser::is_trivial_page;
use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::prompts::{self, DONE_MARKER, PLAN_MARKER};
use crate::state::{AgentState, Field, RagTask, StateUpdate};

use super::{finished_steps_block, ids};

pub struct PlannerNode {
    llm: Arc<dyn LlmClient>,
    keywords: KeywordSettings,
    max_loops: u32,
}

/// Last two labels of the host: the registrable-domain approximation used for
/// continuity checks.
fn registrable_domain(current_url: &str) -> Option<String> {
    let parsed = url::Url::parse(current_url).ok()?;
    let host = parsed.host_str()?;
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return Some(host.to_string());
    }
    Some(labels[labels.len() - 2..].join("."))
}

/// First URL mentioned in free text, if any.
fn first_url_in(text: &str) -> Option<url::Url> {
    let start = text.find("http://").or_else(|| text.find("https://"))?;
    let tail = &text[start..];
    let end = tail
        .find(|c: char| c.is_whitespace() || c == '"' || c == '\'')
        .unwrap_or(tail.len());
    url::Url::parse(&tail[..end]).ok()
}

impl PlannerNode {
    pub fn new(llm: Arc<dyn LlmClient>, keywords: KeywordSettings, max_loops: u32) -> Self {
        Self {
            llm,
            keywords,
            max_loops,
        }
    }

    /// Continuation when the task carries a continuation keyword or names the
    /// current page's registrable domain; fresh otherwise (including when it
    /// points at a different domain).
    fn is_continuation(&self, state: &AgentState) -> bool {
        let task = state.user_task.to_lowercase();
        if self
            .keywords
            .continuation
            .iter()
            .any(|k| task.contains(&k.to_lowercase()))
        {
            return true;
        }
        if let Some(domain) = registrable_domain(&state.current_url) {
            if !domain.is_empty() && task.contains(&domain.to_lowercase()) {
                return true;
            }
        }
        false
    }

    /// Whether the task names a URL on a different domain than the current page.
    fn mentions_foreign_url(&self, state: &AgentState) -> bool {
        let Some(mentioned) = first_url_in(&state.user_task) else {
            return false;
        };
        let mentioned_domain = registrable_domain(mentioned.as_str());
        let current_domain = registrable_domain(&state.current_url);
        match (mentioned_domain, current_domain) {
            (Some(m), Some(c)) => m != c,
            _ => false,
        }
    }

    fn contains_any(text: &str, keywords: &[String]) -> bool {
        let lower = text.to_lowercase();
        keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
    }

    /// Routing for a freshly produced plan: RAG store, RAG question, or the
    /// cache-first code path.
    fn route_plan(&self, plan: &str, update: &mut StateUpdate) -> Goto {
        if Self::contains_any(plan, &self.keywords.rag_store) {
            update.rag_task_type = Field::Set(Some(RagTask::StoreKb));
            return Goto::Node(ids::RAG);
        }
        if Self::contains_any(plan, &self.keywords.rag_query) {
            update.rag_task_type = Field::Set(Some(RagTask::Qa));
            return Goto::Node(ids::RAG);
        }
        Goto::Node(ids::CACHE_LOOKUP)
    }

    /// DONE handling with the knowledge-base interception: a task that asked
    /// for a KB write cannot finish until a finished step proves the write.
    fn route_done(&self, state: &AgentState, update: &mut StateUpdate) -> Goto {
        let wants_kb = Self::contains_any(&state.user_task, &self.keywords.rag_goal);
        let marker = self.keywords.rag_done_marker.to_lowercase();
        let kb_written = state
            .finished_steps
            .iter()
            .any(|s| s.to_lowercase().contains(&marker));
        if wants_kb && !kb_written {
            tracing::info!("done intercepted: knowledge-base write still pending");
            update.rag_task_type = Field::Set(Some(RagTask::StoreKb));
            update.is_complete = Field::Set(false);
            return Goto::Node(ids::RAG);
        }
        update.is_complete = Field::Set(true);
        Goto::End
    }
}

#[async_trait]
impl Node<AgentState> for PlannerNode {
    fn id(&self) -> &'static str {
        ids::PLANNER
    }

    async fn run(
        &self,
        state: &AgentState,
        _config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let mut update = StateUpdate::new();

        // Consecutive-failure counter feeds the abandon-approach directive.
        let step_fail_count = match &state.verification_result {
            Some(v) if !v.is_success => state.step_fail_count + 1,
            Some(_) => 0,
            None => state.step_fail_count,
        };
        update.step_fail_count = Field::Set(step_fail_count);

        let trivial = is_trivial_page(&state.current_url);

        // Entry: first planner pass of a new user input.
        if state.loop_count == 0 {
            if trivial {
                let prompt = prompts::planner_start_prompt(&state.user_task);
                let response = self.llm.invoke(&[Message::user(prompt)]).await?;
                tracing::info!("start plan produced");
                update = update.plan(response.content);
                update.loop_count = Field::Set(1);
                update.is_complete = Field::Set(false);
                return Ok((update, Goto::Node(ids::CACHE_LOOKUP)));
            }

            if self.is_continuation(state) && !self.mentions_foreign_url(state) {
                tracing::info!(url = %state.current_url, "task continuation on current page");
                let prompt = prompts::planner_continue_prompt(
                    &state.user_task,
                    &state.current_url,
                    &finished_steps_block(&state.finished_steps),
                );
                let response = self.llm.invoke(&[Message::user(prompt)]).await?;
                update = update.plan(response.content);
                update.loop_count = Field::Set(1);
                update.is_complete = Field::Set(false);
                return Ok((update, Goto::Node(ids::CACHE_LOOKUP)));
            }

            // Fresh task: everything tied to the previous task is cleared.
            tracing::info!("fresh task detected: resetting task state");
            update = update.fresh_task_reset();
            let prompt = prompts::planner_start_prompt(&state.user_task);
            let response = self.llm.invoke(&[Message::user(prompt)]).await?;
            update = update.plan(response.content);
            return Ok((update, Goto::Node(ids::CACHE_LOOKUP)));
        }

        // Loop ceiling: forced termination with a synthetic finished step.
        if state.loop_count >= self.max_loops {
            tracing::warn!(loops = state.loop_count, "plan iteration ceiling reached");
            update.is_complete = Field::Set(true);
            update = update.append_finished_step(format!(
                "Stopped: reached the plan-iteration ceiling ({}).",
                self.max_loops
            ));
            return Ok((update, Goto::End));
        }

        // Iterative step.
        let suggestions = if state.locator_suggestions.is_empty() {
            "(no locator suggestions; reason about the page from the task alone)".to_string()
        } else {
            serde_json::to_string_pretty(&state.locator_suggestions)
                .unwrap_or_else(|_| "(unserializable suggestions)".to_string())
        };
        let reflections = if state.reflections.is_empty() {
            String::new()
        } else {
            format!(
                "\n[Earlier failures - avoid repeating them]\n{}\n",
                state
                    .reflections
                    .iter()
                    .map(|r| format!("- {r}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        let fail_directive = if step_fail_count >= 2 {
            prompts::fail_override_directive()
        } else {
            String::new()
        };

        let prompt = prompts::planner_step_prompt(
            &state.user_task,
            &state.current_url,
            &finished_steps_block(&state.finished_steps),
            &suggestions,
            &reflections,
            &fail_directive,
        );
        let response = self.llm.invoke(&[Message::user(prompt)]).await?;
        let content = response.content;

        let has_plan = content.contains(PLAN_MARKER);
        let has_done = content.contains(DONE_MARKER);

        update = update.plan(content.clone());
        update.loop_count = Field::Set(state.loop_count + 1);

        // The plan wins when the model contradicts itself mid-stream.
        let goto = if has_plan || !has_done {
            self.route_plan(&content, &mut update)
        } else {
            self.route_done(state, &mut update)
        };
        Ok((update, goto))
    }
}
