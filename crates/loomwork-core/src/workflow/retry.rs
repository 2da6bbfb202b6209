//! Backoff-policy retry loop for the Automated Task Executor.
//!
//! Stateless: given a `RetryPolicy` and an attempt closure that produces a
//! `TaskResult`, retries on `failed`/`rejected` outcomes up to `max_retries`,
//! sleeping between attempts per the configured `BackoffPolicy`. Honors
//! cancellation so a caller can abort a pending sleep.

use std::time::Duration;

use loomwork_types::workflow::{BackoffPolicy, RetryPolicy, TaskResult};
use tokio_util::sync::CancellationToken;

/// Delay before the given zero-indexed retry attempt.
pub fn backoff_delay(policy: &BackoffPolicy, attempt: u32) -> Duration {
    match policy {
        BackoffPolicy::Fixed { delay_secs } => Duration::from_secs(*delay_secs),
        BackoffPolicy::Exponential { delay_secs } => {
            let multiplier = 2u64.saturating_pow(attempt);
            Duration::from_secs(delay_secs.saturating_mul(multiplier))
        }
    }
}

/// Run `attempt` (given the zero-indexed attempt number) up to
/// `policy.max_retries` additional times while it returns a terminal
/// failure, sleeping per the backoff policy between attempts.
///
/// `attempt` receives 0 on the first call; a `None` policy runs the
/// operation exactly once. Returns whatever the last invocation produced.
pub async fn run_with_retry<F, Fut>(
    policy: Option<&RetryPolicy>,
    cancellation: &CancellationToken,
    mut attempt: F,
) -> TaskResult
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = TaskResult>,
{
    let mut attempt_number = 0u32;
    loop {
        let result = attempt(attempt_number).await;
        if !result.status.is_terminal_failure() {
            return result;
        }

        let Some(policy) = policy else {
            return result;
        };
        if attempt_number >= policy.max_retries {
            return result;
        }

        let delay = backoff_delay(&policy.backoff, attempt_number);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancellation.cancelled() => return result,
        }
        attempt_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay_fixed() {
        let policy = BackoffPolicy::Fixed { delay_secs: 5 };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let policy = BackoffPolicy::Exponential { delay_secs: 2 };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_run_with_retry_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = run_with_retry(None, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { TaskResult::success("s1", json!("ok")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.status, loomwork_types::workflow::TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_run_with_retry_exhausts_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: BackoffPolicy::Fixed { delay_secs: 0 },
        };
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = run_with_retry(Some(&policy), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { TaskResult::failed("s1", "boom") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.status, loomwork_types::workflow::TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_with_retry_stops_on_success_mid_loop() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff: BackoffPolicy::Fixed { delay_secs: 0 },
        };
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = run_with_retry(Some(&policy), &cancel, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    TaskResult::failed("s1", "not yet")
                } else {
                    TaskResult::success("s1", json!("ok"))
                }
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.status, loomwork_types::workflow::TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_run_with_retry_does_not_retry_non_failure_terminal_statuses() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff: BackoffPolicy::Fixed { delay_secs: 0 },
        };
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = run_with_retry(Some(&policy), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { TaskResult::paused("s1", Default::default()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.status, loomwork_types::workflow::TaskStatus::Paused);
    }
}
