//! Coder node: synthesize the step program from the plan and the accumulated
//! locator strategies.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::prompts::{self, CODER_SYSTEM_PROMPT};
use crate::state::{AgentState, CodeSource, Field, StateUpdate};

use super::ids;

pub struct CoderNode {
    llm: Arc<dyn LlmClient>,
}

impl CoderNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// Pulls the program out of the first fenced block; a fence-less reply is
/// taken whole.
pub(crate) fn extract_code(content: &str) -> String {
    let Some(open) = content.find("```") else {
        return content.trim().to_string();
    };
    let after_fence = &content[open + 3..];
    // Drop an optional language tag on the fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim().to_string(),
        None => body.trim().to_string(),
    }
}

#[async_trait]
impl Node<AgentState> for CoderNode {
    fn id(&self) -> &'static str {
        ids::CODER
    }

    async fn run(
        &self,
        state: &AgentState,
        _config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let plan = state.plan.clone().unwrap_or_default();
        let strategies_json = if state.locator_suggestions.is_empty() {
            "(no locator strategies)".to_string()
        } else {
            serde_json::to_string_pretty(&state.locator_suggestions)
                .unwrap_or_else(|_| "(unserializable strategies)".to_string())
        };

        let response = self
            .llm
            .invoke(&[
                Message::system(CODER_SYSTEM_PROMPT),
                Message::user(prompts::coder_prompt(&plan, &strategies_json)),
            ])
            .await?;
        let code = extract_code(&response.content);
        tracing::info!(len = code.len(), "step program synthesized");

        let mut update = StateUpdate::new().generated_code(code);
        update.code_source = Field::Set(Some(CodeSource::Llm));
        Ok((update, Goto::Node(ids::EXECUTOR)))
    }
}
