//! Single-worker write-behind queue.
//!
//! `submit` enqueues a boxed async job and returns immediately; one worker task
//! drains the queue in submission order, so writes to a single cache are
//! observed FIFO. `shutdown` closes the queue and waits (bounded) for already
//! submitted jobs to finish; jobs still unwritten at the deadline are logged.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO background writer with an owned worker task.
pub struct WriteBehind {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    label: &'static str,
}

impl WriteBehind {
    pub fn new(label: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
        });
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            pending,
            label,
        }
    }

    /// Jobs submitted but not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueues a job. Returns false when the worker is already shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                if tx.send(Box::pin(job)).is_ok() {
                    true
                } else {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    false
                }
            }
            None => {
                tracing::warn!(cache = self.label, "write dropped: worker already shut down");
                false
            }
        }
    }

    /// Waits (bounded) until every submitted job has completed, without closing
    /// the queue. Test and flush helper.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Closes the queue and waits up to `timeout` for pending writes to drain.
    pub async fn shutdown(&self, timeout: Duration) {
        // Dropping the sender closes the channel; the worker exits after
        // finishing everything already queued.
        self.tx.lock().unwrap().take();
        let handle = self.worker.lock().unwrap().take();
        let Some(handle) = handle else {
            return;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => {}
            Err(_) => {
                let unwritten = self.pending();
                tracing::warn!(
                    cache = self.label,
                    unwritten,
                    "shutdown timeout: abandoning pending writes"
                );
            }
        }
    }
}
