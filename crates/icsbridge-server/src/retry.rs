//! Bounded retries for transient target failures.

use std::future::Future;
use std::time::Duration;

use icsbridge_providers::{ProviderError, ProviderResult};
use tracing::debug;

/// How often and how patiently a failed remote call is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay, `Retry-After` included.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Builder: set the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.multiplier = multiplier;
        self
    }

    /// Delay before retrying after `failures` consecutive failures.
    ///
    /// A server-provided `Retry-After` replaces the computed backoff.
    pub fn delay(&self, failures: u32, error: &ProviderError) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after.min(self.max_backoff);
        }
        if failures == 0 {
            return Duration::ZERO;
        }
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(failures as i32 - 1);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// Runs `call` until it succeeds, fails permanently, exhausts the attempt
    /// budget, or `stop` says no further attempt may start.
    pub async fn run<T, F, Fut, S>(&self, mut call: F, stop: S) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
        S: Fn() -> bool,
    {
        let mut failures = 0;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            failures += 1;

            if !error.is_retryable() || failures >= self.max_attempts || stop() {
                return Err(error);
            }

            let delay = self.delay(failures, &error);
            debug!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;

            if stop() {
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsbridge_providers::ProviderErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
        );
        let err = ProviderError::server("boom");
        assert_eq!(policy.delay(1, &err), Duration::from_secs(1));
        assert_eq!(policy.delay(2, &err), Duration::from_secs(2));
        assert_eq!(policy.delay(3, &err), Duration::from_secs(4));
        assert_eq!(policy.delay(4, &err), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_wins_but_is_bounded() {
        let policy = RetryPolicy::default();
        let err = ProviderError::rate_limited("slow down").with_retry_after(Duration::from_secs(7));
        assert_eq!(policy.delay(1, &err), Duration::from_secs(7));

        let err = ProviderError::rate_limited("slow down").with_retry_after(Duration::from_secs(3600));
        assert_eq!(policy.delay(1, &err), policy.max_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::default()
            .run(
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::network("reset"))
                    } else {
                        Ok("done")
                    }
                },
                || false,
            )
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ProviderResult<()> = RetryPolicy::default()
            .with_max_attempts(3)
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::server("503"))
                },
                || false,
            )
            .await;
        assert_eq!(result.unwrap_err().code(), ProviderErrorCode::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ProviderResult<()> = RetryPolicy::default()
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::bad_request("invalid"))
                },
                || false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_prevents_further_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ProviderResult<()> = RetryPolicy::default()
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::network("reset"))
                },
                || true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
