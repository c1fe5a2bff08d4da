//! Scripted LLM double for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::message::Message;

use super::{LlmClient, LlmResponse};

/// Returns queued responses in order; repeats the last one when the queue runs dry.
/// Records every prompt so tests can assert on what each node actually sent.
pub struct MockLlm {
    queue: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let queue: VecDeque<String> = responses.into_iter().map(Into::into).collect();
        let last = queue.back().cloned().unwrap_or_default();
        Self {
            queue: Mutex::new(queue),
            last: Mutex::new(last),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Appends more scripted responses after construction.
    pub fn push(&self, response: impl Into<String>) {
        let response = response.into();
        *self.last.lock().unwrap() = response.clone();
        self.queue.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        let prompt = messages
            .iter()
            .map(Message::content)
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);
        let content = match self.queue.lock().unwrap().pop_front() {
            Some(r) => r,
            None => self.last.lock().unwrap().clone(),
        };
        Ok(LlmResponse { content })
    }
}
