//! OpenAI-compatible chat client.
//!
//! Temperature is pinned to 0 so planning and verification stay deterministic
//! across retries. A custom base URL and key support self-hosted gateways.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use crate::error::AgentError;
use crate::message::Message;

use super::{LlmClient, LlmResponse};

/// OpenAI Chat Completions client implementing [`LlmClient`].
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl ChatOpenAI {
    /// Creates a client for `model`. `api_key`/`base_url` override the
    /// `OPENAI_API_KEY` / default endpoint when given.
    pub fn new(model: impl Into<String>, api_key: Option<&str>, base_url: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        if let Some(base) = base_url {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the per-call timeout (default 60 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Converts the message list to OpenAI request messages (text only).
    fn messages_to_request(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                Message::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                Message::Assistant(s) => {
                    ChatCompletionRequestMessage::Assistant((s.as_str()).into())
                }
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::messages_to_request(messages));
        args.temperature(0.0);
        let request = args
            .build()
            .map_err(|e| AgentError::failed(format!("chat request build: {e}")))?;

        let started = std::time::Instant::now();
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AgentError::failed(format!("llm call timed out after {:?}", self.timeout))
            })?
            .map_err(|e| AgentError::failed(format!("llm call: {e}")))?;
        tracing::debug!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat completion done"
        );

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::failed("llm returned no choices"))?;
        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: message conversion preserves count and order across roles.
    #[test]
    fn convert_preserves_roles() {
        let msgs = [
            Message::system("s"),
            Message::user("u"),
            Message::assistant("a"),
        ];
        let out = ChatOpenAI::messages_to_request(&msgs);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(out[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(out[2], ChatCompletionRequestMessage::Assistant(_)));
    }
}
