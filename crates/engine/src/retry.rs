//! Retry policy shared by the upload and generation call sites.
//!
//! Backoff grows linearly with the attempt number (1s, 2s, 3s, ...). The
//! wait between attempts races the group's cancellation token so a
//! cancelled group never sits out a backoff sleep.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Bounded-attempt retry with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * base_delay` before retrying.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the default 1-second backoff unit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Delay to wait after a failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Result of driving an operation through a [`RetryPolicy`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on attempt `attempts`.
    Success { value: T, attempts: u32 },
    /// Every attempt failed; `last_error` is from the final one.
    Exhausted { attempts: u32, last_error: E },
    /// The cancellation token fired while waiting to retry.
    Cancelled,
}

/// Run `op` until it succeeds, the policy is exhausted, or the token
/// fires. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(last_error) => {
                if attempt >= policy.max_attempts {
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error,
                    };
                }
                tokio::select! {
                    _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                    _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    // -- delay_for ------------------------------------------------------------

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    // -- retry_with_backoff ---------------------------------------------------

    #[tokio::test]
    async fn first_attempt_success_needs_no_backoff() {
        let cancel = CancellationToken::new();
        let outcome: RetryOutcome<u32, String> =
            retry_with_backoff(RetryPolicy::new(3), &cancel, |_| async { Ok(7) }).await;
        assert!(matches!(outcome, RetryOutcome::Success { value: 7, attempts: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_final_attempt() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<u32, String> =
            retry_with_backoff(RetryPolicy::new(3), &cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("not yet".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Success { value: 3, attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<u32, String> =
            retry_with_backoff(RetryPolicy::new(2), &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always".to_string()) }
            })
            .await;
        match outcome {
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "always");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_backoff_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: RetryOutcome<u32, String> =
            retry_with_backoff(RetryPolicy::new(5), &cancel, |_| async {
                Err("fails".to_string())
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Cancelled));
    }
}
