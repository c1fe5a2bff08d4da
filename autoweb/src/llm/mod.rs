//! LLM client abstraction.
//!
//! Every node that reasons (Observer analysis, Planner, Coder, Verifier,
//! ErrorHandler, query analyzer) depends on a callable that turns a message list
//! into assistant text; this module defines the trait, the OpenAI-compatible
//! implementation, and a scripted mock for tests.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::message::Message;

/// Response from one LLM completion.
pub struct LlmResponse {
    /// Assistant message content (plain text).
    pub content: String,
}

/// LLM client: given messages, returns assistant text.
///
/// Implementations: [`MockLlm`] (scripted responses), [`ChatOpenAI`]
/// (OpenAI-compatible API, temperature 0, bounded timeout).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke one turn: read messages, return assistant content.
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
            Ok(LlmResponse {
                content: format!("echo:{}", messages.last().map(Message::content).unwrap_or("")),
            })
        }
    }

    /// **Scenario**: the trait object form works and sees the last message.
    #[tokio::test]
    async fn trait_object_invocation() {
        let llm: Box<dyn LlmClient> = Box::new(StubLlm);
        let r = llm.invoke(&[Message::user("hi")]).await.unwrap();
        assert_eq!(r.content, "echo:hi");
    }
}
