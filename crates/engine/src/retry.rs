//! Bounded retry with error-classified backoff for provider calls.
//!
//! Transient failures are retried against a configurable backoff table.
//! Rate-limit responses switch to a longer dedicated table with its own
//! attempt ceiling, so a saturated upstream gets real time to recover.
//! Non-retryable errors propagate from the first attempt with zero sleeps.

use std::future::Future;
use std::time::Duration;

use ironloop_config::RetryConfig;
use ironloop_core::ProviderError;
use tracing::{debug, warn};

/// Retry driver for provider calls.
///
/// `max_retries` counts retries after the initial call, so the transient
/// budget is `max_retries + 1` total attempts. The rate-limit ceiling is a
/// total-attempt count already. When attempts outnumber a backoff table,
/// the last entry repeats.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Vec<Duration>,
    rate_limit_backoff: Vec<Duration>,
    rate_limit_max_attempts: u32,
}

impl RetryPolicy {
    /// Policy with a custom transient budget and the default rate-limit
    /// schedule.
    pub fn new(max_retries: u32, backoff_secs: &[u64]) -> Self {
        Self {
            max_retries,
            backoff: to_durations(backoff_secs),
            ..Self::default()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: to_durations(&config.backoff_secs),
            rate_limit_backoff: to_durations(&config.rate_limit_backoff_secs),
            rate_limit_max_attempts: config.rate_limit_max_attempts,
        }
    }

    /// Run `op` until it succeeds or the attempt budget for its error class
    /// is exhausted. Errors that are not retryable propagate immediately.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_observed(op, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), but `on_retry` is called before
    /// every sleep with the failed attempt number, the chosen delay and the
    /// error. The observer cannot alter the retry decision.
    pub async fn execute_observed<T, F, Fut, O>(
        &self,
        mut op: F,
        mut on_retry: O,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        O: FnMut(u32, Duration, &ProviderError),
    {
        let mut attempt: u32 = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(error = %err, "provider error is not retryable");
                return Err(err);
            }

            let (table, budget) = if err.is_rate_limited() {
                (&self.rate_limit_backoff, self.rate_limit_max_attempts)
            } else {
                (&self.backoff, self.max_retries.saturating_add(1))
            };

            if attempt >= budget {
                warn!(attempts = attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }

            let delay = delay_for(table, attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "backing off before retry"
            );
            on_retry(attempt, delay, &err);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

fn to_durations(secs: &[u64]) -> Vec<Duration> {
    secs.iter().copied().map(Duration::from_secs).collect()
}

fn delay_for(table: &[Duration], attempt: u32) -> Duration {
    let last = table.len().saturating_sub(1);
    table
        .get((attempt as usize - 1).min(last))
        .copied()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn transient() -> ProviderError {
        ProviderError::Network("connection reset".into())
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited {
            retry_after_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_skips_backoff() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);
        let delays = Mutex::new(Vec::<Duration>::new());

        let result = policy
            .execute_observed(
                || {
                    *calls.lock().unwrap() += 1;
                    async { Ok::<_, ProviderError>(42) }
                },
                |_, delay, _| delays.lock().unwrap().push(delay),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(delays.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_retries_until_success() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);
        let delays = Mutex::new(Vec::<u64>::new());

        let result = policy
            .execute_observed(
                || {
                    let n = {
                        let mut c = calls.lock().unwrap();
                        *c += 1;
                        *c
                    };
                    async move {
                        if n <= 2 {
                            Err(transient())
                        } else {
                            Ok("done")
                        }
                    }
                },
                |_, delay, _| delays.lock().unwrap().push(delay.as_secs()),
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(*delays.lock().unwrap(), vec![2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_the_attempt_budget() {
        // Default is 3 retries, so 4 attempts in total.
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);

        let result: Result<(), ProviderError> = policy
            .execute(|| {
                *calls.lock().unwrap() += 1;
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_immediately() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);
        let observed = Mutex::new(0u32);

        let result: Result<(), ProviderError> = policy
            .execute_observed(
                || {
                    *calls.lock().unwrap() += 1;
                    async { Err(ProviderError::AuthenticationFailed("bad key".into())) }
                },
                |_, _, _| *observed.lock().unwrap() += 1,
            )
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::AuthenticationFailed(_))
        ));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(*observed.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_use_the_longer_table_and_ceiling() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);
        let delays = Mutex::new(Vec::<u64>::new());

        let result: Result<(), ProviderError> = policy
            .execute_observed(
                || {
                    *calls.lock().unwrap() += 1;
                    async { Err(rate_limited()) }
                },
                |_, delay, _| delays.lock().unwrap().push(delay.as_secs()),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 5);
        assert_eq!(*delays.lock().unwrap(), vec![4, 8, 16, 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_backoff_entry_repeats_when_attempts_outnumber_it() {
        let policy = RetryPolicy::new(4, &[2]);
        let delays = Mutex::new(Vec::<u64>::new());

        let result: Result<(), ProviderError> = policy
            .execute_observed(
                || async { Err(transient()) },
                |_, delay, _| delays.lock().unwrap().push(delay.as_secs()),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(*delays.lock().unwrap(), vec![2, 2, 2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn http_429_takes_the_rate_limit_schedule() {
        let policy = RetryPolicy::default();
        let delays = Mutex::new(Vec::<u64>::new());

        let result: Result<(), ProviderError> = policy
            .execute_observed(
                || async {
                    Err(ProviderError::ApiError {
                        status_code: 429,
                        message: "too many requests".into(),
                    })
                },
                |_, delay, _| delays.lock().unwrap().push(delay.as_secs()),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(delays.lock().unwrap().first().copied(), Some(4));
    }
}
