//! Retry logic with linear backoff
//!
//! Transient steam client failures are retried a bounded number of times
//! with a linearly growing delay (delay = base × attempt number), capped
//! and optionally jittered to avoid synchronized retries across jobs.

use crate::config::RetryConfig;
use crate::error::JobError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (tool hiccups, deadlines) should return `true`.
/// Permanent failures (auth prompts, missing items) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for JobError {
    fn is_retryable(&self) -> bool {
        match self {
            // Tool-level hiccups and phase deadlines are worth another attempt
            JobError::Transient { .. } | JobError::Timeout { .. } => true,
            // Auth prompts must reach the operator, not loop
            JobError::SecondFactorRequired { .. } | JobError::SessionExpired => false,
            // Availability failures never change between attempts
            JobError::AccessDenied | JobError::ItemNotFound => false,
            JobError::NoContent => false,
            JobError::ArchiveTooSmall { .. } | JobError::ArchiveTooLarge { .. } => false,
            JobError::Cancelled => false,
            JobError::Internal { .. } => false,
        }
    }
}

/// Execute an async operation with bounded linear-backoff retries.
///
/// The operation receives the 1-based attempt number. `on_retry` is called
/// before each re-attempt with the attempt number about to start; the
/// orchestrator uses it to reset per-attempt progress.
///
/// Returns the successful result, or the last error once attempts are
/// exhausted or a non-retryable error occurs.
pub async fn with_retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32),
{
    let mut attempt: u32 = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                on_retry(attempt);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(error = %e, attempts = attempt, "retries exhausted");
                } else {
                    tracing::error!(error = %e, "non-retryable failure");
                }
                return Err(e);
            }
        }
    }
}

/// Delay before the retry following `attempt` failed attempts.
///
/// Linear: base × attempt, capped at `max_delay`, plus up to 100% jitter
/// when enabled.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let linear = config
        .base_delay
        .saturating_mul(attempt)
        .min(config.max_delay);
    if config.jitter {
        add_jitter(linear)
    } else {
        linear
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_needs_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(
            &fast_config(5),
            |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, JobError>(42)
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(
            &fast_config(5),
            |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(JobError::Transient {
                            detail: "ERROR! first attempt".into(),
                        })
                    } else {
                        Ok(7)
                    }
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "one failure, one success");
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), JobError> = with_retry(
            &fast_config(3),
            |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(JobError::Transient {
                        detail: "always".into(),
                    })
                }
            },
            |_| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            calls.load(Ordering::SeqCst),
            3,
            "max_attempts counts the first attempt"
        );
    }

    #[tokio::test]
    async fn permanent_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), JobError> = with_retry(
            &fast_config(5),
            |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(JobError::AccessDenied)
                }
            },
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(JobError::AccessDenied)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_retry_sees_each_new_attempt_number() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        let _: Result<(), JobError> = with_retry(
            &fast_config(3),
            |_| async {
                Err(JobError::Transient {
                    detail: "x".into(),
                })
            },
            |attempt| {
                s.try_lock().unwrap().push(attempt);
            },
        )
        .await;

        assert_eq!(*seen.lock().await, vec![2, 3]);
    }

    #[tokio::test]
    async fn operation_receives_attempt_number() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        let _: Result<(), JobError> = with_retry(
            &fast_config(3),
            |attempt| {
                let s = s.clone();
                async move {
                    s.lock().await.push(attempt);
                    Err(JobError::Timeout {
                        phase: "download".into(),
                    })
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(*seen.lock().await, vec![1, 2, 3]);
    }

    // --- backoff shape ---

    #[test]
    fn backoff_is_linear_in_attempt_number() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            jitter: false,
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(40));
    }

    #[test]
    fn backoff_respects_max_delay_cap() {
        let config = RetryConfig {
            max_attempts: 100,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            jitter: false,
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(15));
        assert_eq!(backoff_delay(&config, 50), Duration::from_secs(15));
    }

    #[test]
    fn jitter_stays_within_double_the_base() {
        let delay = Duration::from_millis(50);
        for _ in 0..100 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    // --- retryability classification ---

    #[test]
    fn transient_and_timeout_are_retryable() {
        assert!(JobError::Transient { detail: "x".into() }.is_retryable());
        assert!(
            JobError::Timeout {
                phase: "download".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn auth_and_availability_failures_are_not_retryable() {
        use crate::types::SecondFactorKind;
        assert!(
            !JobError::SecondFactorRequired {
                kind: SecondFactorKind::Email
            }
            .is_retryable()
        );
        assert!(!JobError::SessionExpired.is_retryable());
        assert!(!JobError::AccessDenied.is_retryable());
        assert!(!JobError::ItemNotFound.is_retryable());
    }

    #[test]
    fn verification_and_archive_failures_are_not_retryable() {
        assert!(!JobError::NoContent.is_retryable());
        assert!(
            !JobError::ArchiveTooSmall {
                size: 1,
                floor: 512
            }
            .is_retryable()
        );
        assert!(!JobError::Cancelled.is_retryable());
    }
}
