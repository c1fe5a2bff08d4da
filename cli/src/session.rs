//! Session supervisor: the REPL loop, state resume, and the two
//! human-in-the-loop interrupt menus.
//!
//! A session owns one `thread_id`. New input on a finished thread merges into
//! the checkpointed state (so task continuity survives), while a suspended
//! thread first surfaces its pending interrupt menu.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use autoweb::browser::Tab;
use autoweb::engine::Engine;
use autoweb::error::AgentError;
use autoweb::graph::{InterruptPoint, Resume, RunOutcome, RunnableConfig};
use autoweb::nodes::ids;
use autoweb::state::{AgentState, Field, ListPatch, StateUpdate};

const EDIT_FILE: &str = "temp_code_edit.txt";

pub struct Supervisor {
    engine: Engine,
    tab: Option<Arc<dyn Tab>>,
    thread_id: String,
}

fn prompt_line(prompt: &str) -> std::io::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

impl Supervisor {
    pub fn new(engine: Engine, tab: Option<Arc<dyn Tab>>, thread_id: Option<String>) -> Self {
        let thread_id = thread_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        println!("session thread: {thread_id}");
        Self {
            engine,
            tab,
            thread_id,
        }
    }

    fn config(&self) -> RunnableConfig {
        let mut config = RunnableConfig::new(self.thread_id.clone());
        if let Some(tab) = &self.tab {
            config = config.with_tab(Arc::clone(tab));
        }
        config
    }

    /// Interactive loop: task lines, `qa <question>`, `new`/`reset`,
    /// `exit`/`quit`.
    pub async fn repl(&mut self) -> Result<(), AgentError> {
        println!("AutoWeb ready — type a task, `qa <question>`, `new`, or `exit`.");
        let mut reader = BufReader::new(tokio::io::stdin()).lines();

        loop {
            // A suspended run takes priority over new input.
            if self.handle_pending_interrupt().await? {
                continue;
            }

            print!("> ");
            std::io::stdout().flush().map_err(|e| AgentError::failed(e.to_string()))?;
            let Some(line) = reader
                .next_line()
                .await
                .map_err(|e| AgentError::failed(e.to_string()))?
            else {
                break;
            };
            let line = line.trim();

            match line {
                "" => continue,
                "exit" | "quit" => break,
                "new" | "reset" => {
                    let _ = self.engine.graph().reset(&self.config()).await;
                    self.thread_id = uuid::Uuid::new_v4().to_string();
                    println!("new session thread: {}", self.thread_id);
                }
                _ if line.to_lowercase().starts_with("qa ") => {
                    let question = line[3..].trim();
                    if question.is_empty() {
                        println!("usage: qa <question>");
                        continue;
                    }
                    match self.engine.kb_query().answer(question).await {
                        Ok(answer) => println!("\n{answer}\n"),
                        Err(e) => println!("knowledge base query failed: {e}"),
                    }
                }
                task => {
                    if let Err(e) = self.run_task(task).await {
                        println!("task failed: {e}");
                    }
                }
            }
        }
        println!("bye.");
        Ok(())
    }

    /// Starts (or continues) a graph run for one user task.
    pub async fn run_task(&mut self, task: &str) -> Result<(), AgentError> {
        let config = self.config();
        let graph = self.engine.graph();

        // Task continuity: merge the new input into a finished thread's state
        // so the Planner can decide continuation vs. fresh-task reset.
        let state = match graph.get_checkpoint(&config).await? {
            Some(checkpoint) if checkpoint.next_node.is_none() => {
                let mut state = checkpoint.state;
                let mut update = StateUpdate::new();
                update.user_task = Field::Set(task.to_string());
                update.plan = Field::Set(None);
                update.verification_result = Field::Set(None);
                update.is_complete = Field::Set(false);
                update.rag_task_type = Field::Set(None);
                update.loop_count = Field::Set(0);
                state.apply(update);
                state
            }
            Some(_) => {
                println!("a run is already suspended on this thread; resuming it first");
                return self.drive_pending().await;
            }
            None => AgentState::new(task),
        };

        println!("running: {task}");
        let outcome = graph.invoke(state, &config).await?;
        self.handle_outcome(outcome).await
    }

    /// Resolves a pending interrupt if one exists. Returns whether it did.
    async fn handle_pending_interrupt(&mut self) -> Result<bool, AgentError> {
        let config = self.config();
        let pending = self
            .engine
            .graph()
            .get_checkpoint(&config)
            .await?
            .and_then(|cp| cp.next_node);
        if pending.is_none() {
            return Ok(false);
        }
        self.drive_pending().await?;
        Ok(true)
    }

    async fn drive_pending(&mut self) -> Result<(), AgentError> {
        let config = self.config();
        let graph = Arc::clone(self.engine.graph());
        let checkpoint = graph
            .get_checkpoint(&config)
            .await?
            .ok_or_else(|| AgentError::failed("no checkpoint to resume"))?;
        let Some(next) = checkpoint.next_node else {
            return Ok(());
        };
        let resume = if next == ids::EXECUTOR {
            self.executor_menu(&checkpoint.state).await?
        } else {
            self.verifier_menu(&checkpoint.state).await?
        };
        let Some(resume) = resume else {
            return Ok(()); // user chose to stay paused / quit
        };
        let outcome = graph.resume(&config, resume).await?;
        self.handle_outcome(outcome).await
    }

    async fn handle_outcome(
        &mut self,
        mut outcome: RunOutcome<AgentState>,
    ) -> Result<(), AgentError> {
        loop {
            match outcome {
                RunOutcome::Complete(state) => {
                    println!("\nrun finished ({} steps):", state.finished_steps.len());
                    for step in &state.finished_steps {
                        println!("  - {step}");
                    }
                    return Ok(());
                }
                RunOutcome::Interrupted {
                    state, node, point, ..
                } => {
                    let resume = match (node, point) {
                        (n, InterruptPoint::Before) if n == ids::EXECUTOR => {
                            self.executor_menu(&state).await?
                        }
                        _ => self.verifier_menu(&state).await?,
                    };
                    let Some(resume) = resume else {
                        println!("run left suspended; resume it with your next input");
                        return Ok(());
                    };
                    outcome = self
                        .engine
                        .graph()
                        .resume(&self.config(), resume)
                        .await?;
                }
            }
        }
    }

    /// Menu before the Executor: approve, edit, feedback-replan, or quit.
    async fn executor_menu(&self, state: &AgentState) -> Result<Option<Resume>, AgentError> {
        let code = state.generated_code.as_deref().unwrap_or_default();
        println!("\nstaged program:\n{}", "-".repeat(50));
        let preview: String = code.chars().take(600).collect();
        println!("{preview}{}", if code.len() > 600 { "\n..." } else { "" });
        println!("{}", "-".repeat(50));
        println!("[c]ontinue  [e]dit  [q]uit  or type feedback for a replan");

        let input = prompt_line("admin > ").map_err(|e| AgentError::failed(e.to_string()))?;
        match input.to_lowercase().as_str() {
            "c" | "continue" | "y" | "yes" | "" => Ok(Some(Resume::Continue)),
            "q" | "quit" => Ok(None),
            "e" | "edit" => {
                std::fs::write(EDIT_FILE, code).map_err(|e| AgentError::failed(e.to_string()))?;
                println!("saved to {EDIT_FILE}; edit it, then press Enter");
                let _ = prompt_line("");
                let edited =
                    std::fs::read_to_string(EDIT_FILE).map_err(|e| AgentError::failed(e.to_string()))?;
                if edited != code {
                    let mut update = StateUpdate::new();
                    update.generated_code = Field::Set(Some(edited));
                    self.engine
                        .graph()
                        .update_state(&self.config(), update)
                        .await?;
                    println!("updated program staged");
                }
                Ok(Some(Resume::Continue))
            }
            _ => {
                // Free-form text: feed it back and replan.
                let mut update = StateUpdate::new();
                update.user_task = Field::Set(format!("{} (User feedback: {input})", state.user_task));
                self.engine
                    .graph()
                    .update_state(&self.config(), update)
                    .await?;
                Ok(Some(Resume::Goto(ids::PLANNER)))
            }
        }
    }

    /// Menu after the Verifier: accept, force success/fail, or force done.
    async fn verifier_menu(&self, state: &AgentState) -> Result<Option<Resume>, AgentError> {
        let verification = state.verification_result.clone().unwrap_or_default();
        println!(
            "\nverdict: {} — {}",
            if verification.is_success { "SUCCESS" } else { "FAIL" },
            verification.summary
        );
        println!("[Enter]=accept  [s]=force success  [f]=force fail  [d]=force done");

        let input = prompt_line("admin > ").map_err(|e| AgentError::failed(e.to_string()))?;
        match input.to_lowercase().as_str() {
            "s" => {
                let mut update = StateUpdate::new();
                update.verification_result =
                    Field::Set(Some(autoweb::state::VerificationResult {
                        is_success: true,
                        is_done: false,
                        summary: verification.summary.clone(),
                    }));
                if !verification.is_success {
                    // The node recorded a reflection, not a step; add the step.
                    update.finished_steps =
                        Some(ListPatch::Append(vec![verification.summary.clone()]));
                }
                self.engine
                    .graph()
                    .update_state(&self.config(), update)
                    .await?;
                Ok(Some(Resume::Goto(ids::OBSERVER)))
            }
            "f" => {
                let mut update = StateUpdate::new();
                update.verification_result =
                    Field::Set(Some(autoweb::state::VerificationResult {
                        is_success: false,
                        is_done: false,
                        summary: verification.summary.clone(),
                    }));
                update.reflections = Some(ListPatch::Append(vec![format!(
                    "Step rejected by the operator: {}",
                    verification.summary
                )]));
                self.engine
                    .graph()
                    .update_state(&self.config(), update)
                    .await?;
                Ok(Some(Resume::Goto(ids::OBSERVER)))
            }
            "d" => {
                let mut update = StateUpdate::new();
                update.is_complete = Field::Set(true);
                if !verification.is_success {
                    update.finished_steps =
                        Some(ListPatch::Append(vec![verification.summary.clone()]));
                }
                self.engine
                    .graph()
                    .update_state(&self.config(), update)
                    .await?;
                Ok(Some(Resume::Finish))
            }
            _ => Ok(Some(Resume::Continue)),
        }
    }

    /// Drains caches and the KB buffer; call once before exit.
    pub async fn shutdown(&self, timeout: Duration) {
        self.engine.shutdown(timeout).await;
    }
}
