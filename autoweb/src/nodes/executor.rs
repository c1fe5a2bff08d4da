//! Executor node: ship the program to the runner, capture everything, classify
//! the result, and route.
//!
//! Routing precedence: a failed cache hit always returns to the Planner with
//! the breaker set; syntax-class failures micro-loop through the Coder up to
//! three times; locator-class and exhausted-syntax failures go to the
//! ErrorHandler; clean runs go to the Verifier.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::CodeCacheManager;
use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::runner::{classify_output, CodeRunner, RunOutcome, RunRequest};
use crate::state::{AgentState, CodeSource, ErrorClass, Field, StateUpdate};

use super::ids;

const MAX_CODER_RETRIES: u32 = 3;

pub struct ExecutorNode {
    runner: Arc<dyn CodeRunner>,
    code_cache: Arc<CodeCacheManager>,
    code_log_dir: PathBuf,
}

impl ExecutorNode {
    pub fn new(
        runner: Arc<dyn CodeRunner>,
        code_cache: Arc<CodeCacheManager>,
        code_log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            code_cache,
            code_log_dir: code_log_dir.into(),
        }
    }

    /// Persists the program and its captured output under
    /// `logs/code_log/{exec|error}_YYYYMMDD_HHMMSS.log`. IO failures only log.
    fn dump_code_log(&self, code: &str, output: &str, failed: bool) {
        let prefix = if failed { "error" } else { "exec" };
        let name = format!(
            "{prefix}_{}.log",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.code_log_dir.join(name);
        let content = format!("=== CODE ===\n{code}\n\n=== OUTPUT ===\n{output}\n");
        let result = std::fs::create_dir_all(&self.code_log_dir)
            .and_then(|_| std::fs::write(&path, content));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "code log dump failed");
        }
    }

    /// Cache-sourced code that failed in any way trips the breaker, audits the
    /// hit, and sends the turn back to the Planner.
    fn fail_cached(
        &self,
        state: &AgentState,
        mut update: StateUpdate,
        reason: &str,
    ) -> (StateUpdate, Goto) {
        if let Some(hit_id) = &state.cache_hit_id {
            self.code_cache.record_failure(hit_id, reason);
        }
        tracing::warn!(reason, "cached code failed: breaker tripped");
        update.cache_failed_this_round = Field::Set(true);
        update = update.append_reflection(format!(
            "Cached code failed ({reason}); it was suppressed for this turn."
        ));
        (update, Goto::Node(ids::PLANNER))
    }
}

#[async_trait]
impl Node<AgentState> for ExecutorNode {
    fn id(&self) -> &'static str {
        ids::EXECUTOR
    }

    async fn run(
        &self,
        state: &AgentState,
        config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let code = state.generated_code.clone().unwrap_or_default();
        if code.trim().is_empty() {
            let update = StateUpdate::new()
                .execution_log("Execution failed: no program to run")
                .error("no program to run", ErrorClass::Critical);
            return Ok((update, Goto::Node(ids::ERROR_HANDLER)));
        }

        let pre_url = match &config.tab {
            Some(tab) => tab.url().await.unwrap_or_else(|_| state.current_url.clone()),
            None => state.current_url.clone(),
        };

        let run_result = self
            .runner
            .run(RunRequest {
                code: &code,
                current_url: &pre_url,
            })
            .await;

        let mut update = StateUpdate::new();
        let from_cache = state.code_source == Some(CodeSource::Cache);

        let outcome: RunOutcome = match run_result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Host-level crash: the runner itself broke.
                let log = format!("Critical Execution Error: {e}");
                self.dump_code_log(&code, &log, true);
                update = update.execution_log(log.clone());
                if from_cache {
                    return Ok(self.fail_cached(state, update, &log));
                }
                update = update
                    .error(log.clone(), ErrorClass::Critical)
                    .append_reflection(format!("Execution crashed: {e}"));
                return Ok((update, Goto::Node(ids::ERROR_HANDLER)));
            }
        };

        let post_url = match (&outcome.final_url, &config.tab) {
            (Some(url), _) => url.clone(),
            (None, Some(tab)) => tab.url().await.unwrap_or_else(|_| pre_url.clone()),
            (None, None) => pre_url.clone(),
        };

        let mut log = outcome.combined_text();
        if post_url != pre_url {
            log.push_str(&format!("\n[system] URL changed: {pre_url} -> {post_url}"));
        }
        update = update.execution_log(log.clone()).current_url(post_url);

        let classified = classify_output(&log);
        let crashed = outcome.error.is_some();
        self.dump_code_log(&code, &log, classified.is_some() || crashed);

        if from_cache && (classified.is_some() || crashed) {
            let reason = classified
                .map(|c| format!("{c:?} error in cached code"))
                .unwrap_or_else(|| "cached code crashed".to_string());
            return Ok(self.fail_cached(state, update, &reason));
        }

        match classified {
            Some(ErrorClass::Syntax) if state.coder_retry_count < MAX_CODER_RETRIES => {
                tracing::info!(
                    retry = state.coder_retry_count + 1,
                    "syntax-class failure: regenerating code"
                );
                update.coder_retry_count = Field::Set(state.coder_retry_count + 1);
                update = update.append_reflection(format!(
                    "Generated code hit a syntax-class error (attempt {}).",
                    state.coder_retry_count + 1
                ));
                Ok((update, Goto::Node(ids::CODER)))
            }
            Some(ErrorClass::Syntax) => {
                update = update.error(
                    format!("syntax-class failure persisted after {MAX_CODER_RETRIES} retries"),
                    ErrorClass::Syntax,
                );
                Ok((update, Goto::Node(ids::ERROR_HANDLER)))
            }
            Some(ErrorClass::Locator) => {
                update = update.error("locator-class failure during execution", ErrorClass::Locator);
                Ok((update, Goto::Node(ids::ERROR_HANDLER)))
            }
            Some(ErrorClass::Critical) | None if crashed => {
                let message = outcome.error.unwrap_or_else(|| "unknown crash".to_string());
                update = update
                    .error(message.clone(), ErrorClass::Critical)
                    .append_reflection(format!("Execution crashed: {message}"));
                Ok((update, Goto::Node(ids::ERROR_HANDLER)))
            }
            _ => {
                update.coder_retry_count = Field::Set(0);
                Ok((update, Goto::Node(ids::VERIFIER)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FailureLog;
    use crate::embedding::MockEmbedder;
    use crate::runner::MockRunner;
    use crate::vector::InMemoryBackend;

    fn code_cache(dir: &std::path::Path) -> Arc<CodeCacheManager> {
        Arc::new(CodeCacheManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(MockEmbedder::new()),
            "code_cache",
            &[0.6, 0.2, 0.1, 0.1],
            0.90,
            0.90,
            3,
            Arc::new(FailureLog::new(dir.join("cache_failures.jsonl"))),
        ))
    }

    fn node(runner: Arc<MockRunner>, dir: &std::path::Path) -> ExecutorNode {
        ExecutorNode::new(
            runner,
            code_cache(dir),
            dir.join("code_log"),
        )
    }

    fn state_with_code(code: &str) -> AgentState {
        let mut state = AgentState::new("task");
        state.current_url = "https://site.com/x".into();
        state.generated_code = Some(code.into());
        state.code_source = Some(CodeSource::Llm);
        state
    }

    /// **Scenario**: a clean run resets the retry counter, records the log, and
    /// routes to the Verifier; a code dump lands under code_log.
    #[tokio::test]
    async fn clean_run_to_verifier() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_clean("scraped 20 rows");
        let node = node(Arc::clone(&runner), dir.path());
        let mut state = state_with_code("rows = tab.query_all('.x')");
        state.coder_retry_count = 2;

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::VERIFIER));
        assert_eq!(update.coder_retry_count, Field::Set(0));
        assert!(matches!(update.execution_log, Field::Set(Some(ref l)) if l.contains("20 rows")));
        let dumps: Vec<_> = std::fs::read_dir(dir.path().join("code_log")).unwrap().collect();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].as_ref().unwrap().file_name().to_string_lossy().starts_with("exec_"));
    }

    /// **Scenario**: syntax-class output under the retry limit routes back to
    /// the Coder with an incremented counter.
    #[tokio::test]
    async fn syntax_retries_via_coder() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_ok(RunOutcome {
            stderr: "SyntaxError: invalid syntax".into(),
            ..Default::default()
        });
        let node = node(runner, dir.path());
        let state = state_with_code("broken(");

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::CODER));
        assert_eq!(update.coder_retry_count, Field::Set(1));
    }

    /// **Scenario**: exhausted syntax retries surface to the ErrorHandler.
    #[tokio::test]
    async fn syntax_exhausted_to_error_handler() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_ok(RunOutcome {
            stderr: "NameError: nope".into(),
            ..Default::default()
        });
        let node = node(runner, dir.path());
        let mut state = state_with_code("broken(");
        state.coder_retry_count = 3;

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::ERROR_HANDLER));
        assert!(matches!(update.error_type, Field::Set(Some(ErrorClass::Syntax))));
    }

    /// **Scenario**: locator-class failures go to the ErrorHandler directly.
    #[tokio::test]
    async fn locator_to_error_handler() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_ok(RunOutcome {
            stdout: "Element not found: #missing".into(),
            ..Default::default()
        });
        let node = node(runner, dir.path());
        let state = state_with_code("tab.query('#missing').click()");

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::ERROR_HANDLER));
        assert!(matches!(update.error_type, Field::Set(Some(ErrorClass::Locator))));
    }

    /// **Scenario**: any failure of cache-sourced code trips the breaker,
    /// audits the hit, and routes to the Planner (never the Coder).
    #[tokio::test]
    async fn cached_failure_trips_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_ok(RunOutcome {
            stdout: "Element not found: #gone".into(),
            ..Default::default()
        });
        let node = node(runner, dir.path());
        let mut state = state_with_code("cached_program()");
        state.code_source = Some(CodeSource::Cache);
        state.cache_hit_id = Some("hit-42".into());

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        assert_eq!(update.cache_failed_this_round, Field::Set(true));
        assert!(update.reflections.is_some());
        let audit = std::fs::read_to_string(dir.path().join("cache_failures.jsonl")).unwrap();
        assert!(audit.contains("hit-42"));
    }

    /// **Scenario**: a runner host crash is a critical error; state carries the
    /// full message and routes to the ErrorHandler.
    #[tokio::test]
    async fn host_crash_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_crash("runner process died");
        let node = node(runner, dir.path());
        let state = state_with_code("anything()");

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::ERROR_HANDLER));
        assert!(matches!(update.error_type, Field::Set(Some(ErrorClass::Critical))));
        assert!(matches!(update.execution_log, Field::Set(Some(ref l)) if l.contains("Critical")));
    }

    /// **Scenario**: a URL change appends the synthetic system note.
    #[tokio::test]
    async fn url_change_noted() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        runner.push_ok(RunOutcome {
            stdout: "navigated".into(),
            final_url: Some("https://site.com/page2".into()),
            ..Default::default()
        });
        let node = node(runner, dir.path());
        let state = state_with_code("navigate('https://site.com/page2')");

        let (update, _) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        let Field::Set(Some(log)) = update.execution_log else { panic!() };
        assert!(log.contains("[system] URL changed"));
        assert_eq!(update.current_url, Field::Set("https://site.com/page2".into()));
    }
}
