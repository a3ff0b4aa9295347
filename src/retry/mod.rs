//! Bounded exponential backoff for remote operations.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::errors::AppError;

/// Backoff settings for the retry controller.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to every wait
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt, excluding jitter:
    /// `min(initial_delay * backoff_factor ^ attempt, max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Backoff plus a uniformly random jitter in `[0, max_jitter]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or `max_attempts` invocations have failed.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!("{}: attempt {}/{}", label, attempt, max_attempts);

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::warn!("{}: giving up on non-retryable error: {}", label, err);
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::error!("{}: failed after {} attempts: {}", label, attempt, err);
                return Err(AppError::RetryExhausted {
                    label: label.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let wait = self.delay(attempt - 1);
            tracing::warn!(
                "{}: attempt {} failed ({}), retrying in {:?}",
                label,
                attempt,
                err,
                wait
            );
            tokio::time::sleep(wait).await;
        }
    }
}

/// Run `operation` under `policy`; see [`RetryPolicy::execute`].
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    policy.execute(label, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(5),
            max_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = execute_with_retry(&fast_policy(), "loadMember", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AppError::Transient(format!("hiccup {}", n)))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), AppError> = execute_with_retry(&fast_policy(), "saveField", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Transient("offline".to_string()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("saveField"));
        match err {
            AppError::RetryExhausted {
                label, attempts, ..
            } => {
                assert_eq!(label, "saveField");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), AppError> = fast_policy()
            .execute("loadMember", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::NotFound("m404".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(10), Duration::from_millis(10_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }
}
