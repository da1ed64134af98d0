//! Retry with exponential backoff for oracle calls
//!
//! Only [`ErrorClass::Retryable`] failures are retried; fatal and terminal
//! failures are returned on the attempt that produced them.

use kgx_core::{ErrorClass, OracleConfig, OracleError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }

    /// Run `f` until it succeeds, fails non-retryably, or the budget is spent.
    ///
    /// `f` receives the 1-based attempt number.
    pub async fn retry<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, OracleError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if e.class() != ErrorClass::Retryable => {
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Err(e);
                }
                Err(e) => {
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    let backoff = self.backoff_for(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OracleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 3_000, 10_000);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(3));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(6));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(60), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retryable_errors_exhaust_budget() {
        let policy = RetryPolicy::new(3, 1, 2);
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = policy
            .retry("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OracleError::Connection("refused".into())) }
            })
            .await;

        assert!(matches!(result, Err(OracleError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_fatal_error_not_retried() {
        let policy = RetryPolicy::new(3, 1, 2);
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = tokio_test::block_on(policy.retry("test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::Auth("invalid key".into())) }
        }));

        assert!(matches!(result, Err(OracleError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, 1, 2);

        let result = policy
            .retry("test", |attempt| async move {
                if attempt < 3 {
                    Err(OracleError::RateLimited("429".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }
}
