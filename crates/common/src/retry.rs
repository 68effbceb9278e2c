//! Bounded retry with exponential backoff
//!
//! One policy object (attempt budget, backoff curve, retry predicate) shared by
//! the financial data client and the embedding provider.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error the predicate refused to retry.
    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    /// The error of the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Randomize each delay by +/-50%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Backoff curve for one retried call
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_delay)
            .with_randomization_factor(if self.jitter { 0.5 } else { 0.0 })
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds, fails terminally, or the attempt budget is spent.
    ///
    /// The attempt number (starting at 1) is passed to `op`.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(operation, |e: &E| e.is_retryable(), op).await
    }

    /// Like [`RetryPolicy::run`] with an explicit retry predicate.
    pub async fn run_if<T, E, P, F, Fut>(
        &self,
        operation: &str,
        should_retry: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        P: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !should_retry(&e) => return Err(RetryError::Aborted(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.max_delay)
                        .min(self.max_delay);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_curve_is_capped() {
        let mut backoff = RetryPolicy::default().backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(8)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky) }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Aborted(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_predicate_overrides_trait() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run_if(
                "test",
                |_: &TestError| false,
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        assert_eq!(attempt, 1);
                        Err(TestError::Flaky)
                    }
                },
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
