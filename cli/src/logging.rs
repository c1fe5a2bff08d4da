//! Tracing setup: console output plus a daily-rotated file log under
//! `logs/sys_log/autoweb.log`, retained for 30 days.

use std::io;
use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const RETAINED_LOG_FILES: usize = 30;

/// Initializes the global subscriber. The returned guard must stay alive for
/// the file appender to flush.
pub fn init(
    logs_dir: &Path,
    verbose: bool,
) -> io::Result<tracing_appender::non_blocking::WorkerGuard> {
    let sys_log_dir = logs_dir.join("sys_log");
    std::fs::create_dir_all(&sys_log_dir)?;
    prune_old_logs(&sys_log_dir);

    let file_appender = tracing_appender::rolling::daily(&sys_log_dir, "autoweb.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(guard)
}

/// Keeps the newest `RETAINED_LOG_FILES` rotated files, removes the rest.
fn prune_old_logs(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut files: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("autoweb.log")
        })
        .filter_map(|e| e.metadata().and_then(|m| m.modified()).ok().map(|t| (t, e.path())))
        .collect();
    if files.len() <= RETAINED_LOG_FILES {
        return;
    }
    files.sort_by_key(|(t, _)| *t);
    let excess = files.len() - RETAINED_LOG_FILES;
    for (_, path) in files.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&path) {
            eprintln!("log prune failed for {}: {e}", path.display());
        }
    }
}
