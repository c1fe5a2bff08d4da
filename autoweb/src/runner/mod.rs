//! External code runner.
//!
//! Generated programs are data, not trusted code: they run in a separate
//! runner process reached over stdin/stdout JSON IPC. The engine owns only the
//! request/response framing and the classification of what came back.

mod classify;
mod process;

pub use classify::{classify_output, ErrorKeywords};
pub use process::ProcessRunner;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner spawn failed: {0}")]
    Spawn(String),
    #[error("runner io: {0}")]
    Io(String),
    #[error("runner timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("runner reply decode: {0}")]
    Decode(String),
}

/// Request shipped to the runner process.
#[derive(Debug, Serialize)]
pub struct RunRequest<'a> {
    pub code: &'a str,
    pub current_url: &'a str,
}

/// What the runner reports back.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Uncaught exception text, when the program crashed.
    #[serde(default)]
    pub error: Option<String>,
    /// URL after the program ran, when the runner tracked it.
    #[serde(default)]
    pub final_url: Option<String>,
}

impl RunOutcome {
    /// All captured text, in classification order: exception first.
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        if let Some(error) = &self.error {
            out.push_str(error);
            out.push('\n');
        }
        out.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            out.push('\n');
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Executes one generated program and reports its captured output.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, RunnerError>;
}

/// Scripted runner double: pops queued outcomes in order, repeating the last.
#[derive(Default)]
pub struct MockRunner {
    queue: Mutex<VecDeque<Result<RunOutcome, String>>>,
    last: Mutex<Option<Result<RunOutcome, String>>>,
    pub executed: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, outcome: RunOutcome) {
        self.queue.lock().unwrap().push_back(Ok(outcome.clone()));
        *self.last.lock().unwrap() = Some(Ok(outcome));
    }

    pub fn push_clean(&self, stdout: &str) {
        self.push_ok(RunOutcome {
            stdout: stdout.to_string(),
            ..Default::default()
        });
    }

    pub fn push_crash(&self, message: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        *self.last.lock().unwrap() = Some(Err(message.to_string()));
    }
}

#[async_trait]
impl CodeRunner for MockRunner {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, RunnerError> {
        self.executed.lock().unwrap().push(request.code.to_string());
        let next = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.last.lock().unwrap().clone());
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(RunnerError::Io(message)),
            None => Ok(RunOutcome::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: combined text leads with the exception for classification.
    #[test]
    fn combined_text_order() {
        let outcome = RunOutcome {
            stdout: "did things".into(),
            stderr: "warn line".into(),
            error: Some("NameError: x is not defined".into()),
            final_url: None,
        };
        let text = outcome.combined_text();
        assert!(text.starts_with("NameError"));
        assert!(text.contains("did things"));
        assert!(text.ends_with("warn line"));
    }

    /// **Scenario**: the mock runner records executed code and drains in order.
    #[tokio::test]
    async fn mock_runner_behavior() {
        let runner = MockRunner::new();
        runner.push_clean("first");
        runner.push_crash("boom");
        let a = runner
            .run(RunRequest { code: "print(1)", current_url: "u" })
            .await
            .unwrap();
        assert_eq!(a.stdout, "first");
        assert!(runner
            .run(RunRequest { code: "print(2)", current_url: "u" })
            .await
            .is_err());
        assert_eq!(runner.executed.lock().unwrap().len(), 2);
    }
}
