use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Attempt budget and base delay for calls into external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Wait after the failed attempt with zero-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff(self.base_delay, attempt)
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_operation(op, self.max_retries, self.base_delay).await
    }
}

fn backoff(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(attempt))
}

/// Runs `op` up to `max_retries` times, sleeping `base_delay * 2^attempt`
/// between attempts. Only transient errors are retried; anything else, and the
/// last transient error once attempts run out, is returned as is.
pub async fn retry_operation<T, F, Fut>(mut op: F, max_retries: u32, base_delay: Duration) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_retries.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let wait = backoff(base_delay, attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = calls.clone();
        let result = retry_operation(
            move || {
                let recorded = recorded.clone();
                async move {
                    let mut calls = recorded.lock().unwrap();
                    calls.push(Instant::now());
                    if calls.len() < 3 {
                        Err(AgentError::TransientUpstream("unavailable".into()))
                    } else {
                        Ok("done")
                    }
                }
            },
            3,
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(result.unwrap(), "done");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let first_wait = calls[1] - calls[0];
        let second_wait = calls[2] - calls[1];
        assert!(first_wait >= Duration::from_secs(1) && first_wait < Duration::from_millis(1100));
        assert!(second_wait >= Duration::from_secs(2) && second_wait < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_error() {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = attempts.clone();
        let started = Instant::now();

        let result: Result<()> = retry_operation(
            move || {
                let counter = counter.clone();
                async move {
                    let mut n = counter.lock().unwrap();
                    *n += 1;
                    Err(AgentError::TransientUpstream(format!("failure {}", *n)))
                }
            },
            3,
            Duration::from_millis(500),
        )
        .await;

        match result {
            Err(AgentError::TransientUpstream(msg)) => assert_eq!(msg, "failure 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(*attempts.lock().unwrap(), 3);
        // 0.5s + 1s of backoff, no sleep after the final attempt
        assert!(started.elapsed() < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors_are_not_retried() {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = attempts.clone();

        let result: Result<()> = retry_operation(
            move || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err(AgentError::Validation("bedrooms".into()))
                }
            },
            5,
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(AgentError::Validation(_))));
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(4, Duration::from_millis(250));
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    }
}
