//! Append-only audit of cache hits that later failed.
//!
//! Failures never auto-delete cache rows; the per-turn breaker suppresses the
//! bad hit and this file records it for a human to act on.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Serialize)]
struct FailureRecord<'a> {
    cache_id: &'a str,
    cache_type: &'a str,
    timestamp: String,
    reason: &'a str,
}

/// JSONL appender for `output/cache_failures.jsonl`.
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record; IO problems are logged, never propagated — the
    /// audit trail must not break the agent loop.
    pub fn record(&self, cache_id: &str, cache_type: &str, reason: &str) {
        let record = FailureRecord {
            cache_id,
            cache_type,
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            reason,
        };
        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };
        let _guard = self.lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failure audit append failed");
        }
    }
}
