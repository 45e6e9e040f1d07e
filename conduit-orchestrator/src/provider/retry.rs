//! Retry policy for provider calls
//!
//! Transient failures are retried with exponential backoff
//! (`base_delay * 2^attempt`, capped at `max_delay`). Terminal failures
//! and exhausted attempts are returned to the caller unchanged.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails terminally, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt + 1,
                        max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast_policy(3)
            .run("submit", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("503".to_string()))
                } else {
                    Ok("handle-1")
                }
            })
            .await;

        assert_eq!(result, Ok("handle-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast_policy(2)
            .run("submit", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("timeout".to_string()))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_errors_surface_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast_policy(5)
            .run("cancel", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Terminal("forbidden".to_string()))
            })
            .await;

        assert_eq!(result, Err(ProviderError::Terminal("forbidden".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
