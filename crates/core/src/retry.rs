//! Bounded retries with exponential backoff for outbound provider calls.
//!
//! The executor keeps no state between calls; every `execute` starts a fresh
//! attempt counter and elapsed-time budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::errors::ProviderError;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_elapsed: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_elapsed: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_elapsed: Duration::from_secs(settings.max_elapsed_secs),
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after `attempt` (1-based) failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            // Equal jitter: keep at least half of the computed delay.
            capped_ms * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

#[derive(Clone, Debug)]
pub struct RetryExecutor {
    provider: String,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(provider: impl Into<String>, policy: RetryPolicy) -> Self {
        Self { provider: provider.into(), policy }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// or elapsed-time budget runs out. The closure receives the 1-based
    /// attempt number. The returned error records how many attempts ran.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            debug!(
                event_name = "retry.attempt.started",
                provider = %self.provider,
                operation = operation_name,
                attempt,
                max_attempts = self.policy.max_attempts,
                "calling provider"
            );

            let mut error = match operation(attempt).await {
                Ok(value) => {
                    debug!(
                        event_name = "retry.attempt.succeeded",
                        provider = %self.provider,
                        operation = operation_name,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "provider call succeeded"
                    );
                    return Ok(value);
                }
                Err(error) => error,
            };
            error.attempts = attempt;

            if !error.is_retryable() {
                warn!(
                    event_name = "retry.attempt.permanent_failure",
                    provider = %self.provider,
                    operation = operation_name,
                    attempt,
                    error_class = error.class.as_str(),
                    status = error.status,
                    "provider call failed with a non-retryable error"
                );
                return Err(error);
            }

            if attempt >= self.policy.max_attempts {
                warn!(
                    event_name = "retry.attempts_exhausted",
                    provider = %self.provider,
                    operation = operation_name,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error_class = error.class.as_str(),
                    "provider call failed on final attempt"
                );
                return Err(error);
            }

            let delay = match error.retry_after_secs {
                Some(seconds) => Duration::from_secs(seconds),
                None => self.policy.backoff_for(attempt),
            };

            // A provider-supplied Retry-After may not fit in a Duration sum.
            let over_budget = started
                .elapsed()
                .checked_add(delay)
                .map_or(true, |total| total > self.policy.max_elapsed);
            if over_budget {
                warn!(
                    event_name = "retry.elapsed_budget_exhausted",
                    provider = %self.provider,
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    max_elapsed_ms = self.policy.max_elapsed.as_millis() as u64,
                    error_class = error.class.as_str(),
                    "next retry would exceed the elapsed-time cap"
                );
                return Err(error);
            }

            warn!(
                event_name = "retry.attempt.failed",
                provider = %self.provider,
                operation = operation_name,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error_class = error.class.as_str(),
                error = %error,
                "retrying after transient provider error"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use super::{RetryExecutor, RetryPolicy};
    use crate::errors::{ProviderError, ProviderErrorClass};

    fn policy(max_attempts: u32, initial_ms: u64, max_elapsed_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_elapsed: Duration::from_secs(max_elapsed_secs),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let executor = RetryExecutor::new("acme", policy(4, 100, 30));
        let calls = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute("create_agent", |_| {
                let calls = calls.clone();
                async move {
                    let seen = calls.fetch_add(1, Ordering::SeqCst);
                    if seen < 2 {
                        Err(ProviderError::connection("acme", "reset by peer"))
                    } else {
                        Ok("rem_1")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("rem_1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_stop_at_max_attempts() {
        let executor = RetryExecutor::new("acme", policy(3, 100, 30));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let error = executor
            .execute("create_agent", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::from_status("acme", 500, None, json!({}))) }
            })
            .await
            .expect_err("every attempt fails");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.attempts, 3);
        assert_eq!(error.status, Some(500));
        assert_eq!(error.class, ProviderErrorClass::Server);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let executor = RetryExecutor::new("acme", policy(5, 100, 30));
        let calls = AtomicU32::new(0);

        let error = executor
            .execute("update_agent", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ProviderError::from_status(
                        "acme",
                        422,
                        None,
                        json!({ "error": "bad voice" }),
                    ))
                }
            })
            .await
            .expect_err("4xx is permanent");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.attempts, 1);
        assert_eq!(error.details, json!({ "error": "bad voice" }));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_computed_delay() {
        let executor = RetryExecutor::new("acme", policy(3, 10, 30));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = executor
            .execute("create_voice", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        Err(ProviderError::from_status("acme", 429, Some(3), json!({})))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_retry_after_exhausts_the_budget() {
        let executor = RetryExecutor::new("acme", policy(3, 10, 30));
        let calls = AtomicU32::new(0);

        let error = executor
            .execute("create_voice", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(1_100)).await;
                    Err::<(), _>(ProviderError::from_status("acme", 429, Some(u64::MAX), json!({})))
                }
            })
            .await
            .expect_err("the wait cannot fit the elapsed cap");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error.attempts, 1);
        assert_eq!(error.status, Some(429));
        assert_eq!(error.retry_after_secs, Some(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_cap_bounds_total_latency() {
        let executor = RetryExecutor::new("acme", policy(10, 1_000, 5));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let error = executor
            .execute("delete_batch", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::timeout("acme", "no response")) }
            })
            .await
            .expect_err("budget runs out");

        // Delays of 1s and 2s fit; the following 4s would overrun the 5s cap.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.attempts, 3);
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    #[test]
    fn backoff_is_capped_and_jitter_keeps_half() {
        let mut policy = policy(5, 1_000, 30);
        policy.max_delay = Duration::from_millis(3_000);

        assert_eq!(policy.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(3_000));

        policy.jitter = true;
        for _ in 0..20 {
            let delay = policy.backoff_for(2);
            assert!(delay >= Duration::from_millis(1_000) && delay <= Duration::from_millis(2_000));
        }
    }
}
