//! Subprocess runner: one process per execution, JSON over stdin/stdout.
//!
//! The runner command (e.g. `python runner.py`) receives a single-line JSON
//! request on stdin, executes the program against its own browser connection,
//! and prints a single-line JSON [`RunOutcome`] on stdout. One process per
//! execution keeps a crashed interpreter from poisoning the next turn.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{CodeRunner, RunOutcome, RunRequest, RunnerError};

pub struct ProcessRunner {
    command: Vec<String>,
    timeout: Duration,
}

impl ProcessRunner {
    /// `command` is the whitespace-split runner invocation; `timeout` bounds
    /// one execution end to end.
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, RunnerError> {
        if command.is_empty() {
            return Err(RunnerError::Spawn("empty runner command".into()));
        }
        Ok(Self { command, timeout })
    }

    async fn run_once(&self, request: &RunRequest<'_>) -> Result<RunOutcome, RunnerError> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{}: {e}", self.command[0])))?;

        let payload =
            serde_json::to_string(request).map_err(|e| RunnerError::Io(e.to_string()))?;
        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| RunnerError::Io("runner stdin unavailable".into()))?;
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| RunnerError::Io(e.to_string()))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| RunnerError::Io(e.to_string()))?;
        }
        drop(child.stdin.take());

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)
                .await
                .map_err(|e| RunnerError::Io(e.to_string()))?;
        }
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        let _ = child.wait().await;

        // The reply is the last JSON line; anything before it is stray prints
        // from the runner host itself.
        let reply_line = stdout
            .lines()
            .rev()
            .find(|line| line.trim_start().starts_with('{'))
            .ok_or_else(|| {
                RunnerError::Decode(format!(
                    "no JSON reply (stdout: {:.120}, stderr: {:.120})",
                    stdout, stderr
                ))
            })?;
        serde_json::from_str(reply_line).map_err(|e| RunnerError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CodeRunner for ProcessRunner {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, RunnerError> {
        match tokio::time::timeout(self.timeout, self.run_once(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RunnerError::Timeout(self.timeout)),
        }
    }
}
