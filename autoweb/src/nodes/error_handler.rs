//! Error-handler node: decide between recovery and termination.
//!
//! Reached only for reified errors (locator-class, exhausted syntax retries,
//! critical crashes). The model picks RETRY (re-observe the page and replan)
//! or TERMINATE (finish the task as complete-with-failure).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::prompts;
use crate::state::{AgentState, Field, StateUpdate};

use super::ids;

pub struct ErrorHandlerNode {
    llm: Arc<dyn LlmClient>,
}

impl ErrorHandlerNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Node<AgentState> for ErrorHandlerNode {
    fn id(&self) -> &'static str {
        ids::ERROR_HANDLER
    }

    async fn run(
        &self,
        state: &AgentState,
        _config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let error = state
            .error
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());
        let last_reflection = state
            .reflections
            .last()
            .cloned()
            .unwrap_or_else(|| "(none)".to_string());

        let prompt = prompts::error_handler_prompt(&error, &last_reflection);
        let response = self.llm.invoke(&[Message::user(prompt)]).await?;
        let terminate = response.content.contains("Status: TERMINATE");

        let mut update = StateUpdate::new();
        // Error flags clear either way; the decision is carried by routing.
        update.error = Field::Set(None);
        update.error_type = Field::Set(None);

        if terminate {
            tracing::warn!(error = %error, "unrecoverable: terminating task");
            update.is_complete = Field::Set(true);
            update = update.append_finished_step(format!(
                "Terminated after an unrecoverable error: {error}"
            ));
            Ok((update, Goto::End))
        } else {
            tracing::info!("recovery chosen: re-observing the page");
            Ok((update, Goto::Node(ids::OBSERVER)))
        }
    }
}
