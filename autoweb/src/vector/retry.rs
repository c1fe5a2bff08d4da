//! Shared retry wrapper for vector-store calls.
//!
//! Keyword classification mirrors what the store actually returns: transient
//! transport noise retries, schema/parameter mistakes abort at once.

use std::future::Future;
use std::time::Duration;

use super::VectorError;

const RETRYABLE: &[&str] = &[
    "timed out",
    "timeout",
    "temporarily unavailable",
    "connection reset",
    "connection refused",
    "connection aborted",
    "connection",
    "unavailable",
    "rpc",
    "channel",
    "socket",
    "deadline exceeded",
];

const NON_RETRYABLE: &[&str] = &[
    "schema",
    "field not found",
    "illegal",
    "invalid",
    "dimension",
    "param error",
];

/// Attempts and backoff base for vector operations.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(300),
            factor: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after attempt `n` (1-based): `backoff * factor^(n-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * self.factor.pow(attempt.saturating_sub(1))
    }
}

/// Whether an error message looks transient. Non-retryable keywords win.
pub fn is_retryable_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    if NON_RETRYABLE.iter().any(|k| msg.contains(k)) {
        return false;
    }
    RETRYABLE.iter().any(|k| msg.contains(k))
}

/// Runs `make_call` up to `policy.attempts` times, logging duration and outcome
/// per attempt. Non-retryable failures and exhausted attempts return the last error.
pub async fn run_with_retry<T, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    mut make_call: F,
) -> Result<T, VectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VectorError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last: Option<VectorError> = None;
    for attempt in 1..=attempts {
        let started = std::time::Instant::now();
        match make_call().await {
            Ok(value) => {
                let cost_ms = started.elapsed().as_millis() as u64;
                if attempt > 1 {
                    tracing::info!(operation, attempt, cost_ms, "recovered");
                } else {
                    tracing::debug!(operation, cost_ms, "ok");
                }
                return Ok(value);
            }
            Err(err) => {
                let cost_ms = started.elapsed().as_millis() as u64;
                let retryable = is_retryable_message(&err.message());
                tracing::warn!(
                    operation,
                    attempt,
                    attempts,
                    retryable,
                    cost_ms,
                    error = %err,
                    "vector call failed"
                );
                let stop = !retryable || attempt >= attempts;
                last = Some(err);
                if stop {
                    break;
                }
                tokio::time::sleep(policy.delay(attempt)).await;
            }
        }
    }
    Err(last.unwrap_or_else(|| VectorError::Transport("retry loop without attempt".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// **Scenario**: classification follows the keyword sets, non-retryable wins.
    #[test]
    fn classification() {
        assert!(is_retryable_message("rpc deadline exceeded"));
        assert!(is_retryable_message("Connection refused by peer"));
        assert!(!is_retryable_message("schema mismatch on field x"));
        assert!(!is_retryable_message("dimension 64 != 1536"));
        assert!(!is_retryable_message("invalid param error in rpc channel"));
        assert!(!is_retryable_message("plain weird failure"));
    }

    /// **Scenario**: backoff grows as 0.3 × 3^(n-1).
    #[test]
    fn backoff_schedule() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(1), Duration::from_millis(300));
        assert_eq!(p.delay(2), Duration::from_millis(900));
        assert_eq!(p.delay(3), Duration::from_millis(2700));
    }

    /// **Scenario**: a transient failure recovers on the second attempt; a
    /// non-retryable one stops after the first.
    #[tokio::test]
    async fn retry_behavior() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let out = run_with_retry("op", policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(VectorError::Transport("timeout".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = AtomicU32::new(0);
        let err = run_with_retry("op", policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<i32, _>(VectorError::Rejected("schema broken".into())) }
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("schema"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
