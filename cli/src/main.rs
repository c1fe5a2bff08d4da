//! AutoWeb CLI binary: interactive session supervisor.
//!
//! Startup order: env/config load → tracing init (daily-rotated file log) →
//! engine build → browser launch → REPL. Exit code 0 on a normal quit,
//! non-zero on unrecoverable startup failure.

mod browser_cdp;
mod logging;
mod session;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use autoweb::engine::{Engine, EngineOverrides};
use env_config::Settings;

#[derive(Parser, Debug)]
#[command(name = "autoweb")]
#[command(about = "AutoWeb — LLM-driven browser automation agent")]
struct Args {
    /// Thread ID for session continuity (default: a fresh UUID)
    #[arg(long, value_name = "ID")]
    thread_id: Option<String>,

    /// Run one task non-interactively and exit
    #[arg(short, long, value_name = "TEXT")]
    task: Option<String>,

    /// Run without launching a browser (tabless dry mode, for smoke tests)
    #[arg(long)]
    no_browser: bool,

    /// Verbose: raise the default log filter to debug
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = env_config::load_and_apply("autoweb", None) {
        eprintln!("config load failed: {e}");
        return ExitCode::from(2);
    }
    let settings = Settings::from_env();

    let _log_guard = match logging::init(&settings.logs_dir, args.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("logging init failed: {e}");
            return ExitCode::from(2);
        }
    };

    tracing::info!(model = %settings.model_name, store = %settings.milvus_uri, "starting autoweb");

    let engine = match Engine::build(settings.clone(), EngineOverrides::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("engine startup failed: {e}");
            return ExitCode::from(2);
        }
    };

    let browser = if args.no_browser {
        None
    } else {
        match browser_cdp::CdpBrowser::launch(&settings).await {
            Ok(browser) => Some(browser),
            Err(e) => {
                eprintln!("browser launch failed: {e}");
                engine.shutdown(Duration::from_secs(5)).await;
                return ExitCode::from(2);
            }
        }
    };
    let tab = browser.as_ref().map(|b| b.tab());

    let mut supervisor = session::Supervisor::new(engine, tab, args.thread_id);
    let result = match args.task {
        Some(task) => supervisor.run_task(&task).await,
        None => supervisor.repl().await,
    };

    supervisor.shutdown(Duration::from_secs(10)).await;
    if let Some(browser) = browser {
        browser.close().await;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("session error: {e}");
            ExitCode::FAILURE
        }
    }
}
