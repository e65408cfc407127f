//! Bounded exponential backoff around a single-attempt operation.
//!
//! Every attempt runs under its own timeout. Retries stop when the attempt
//! count runs out, when an error is terminal, or when the retry window has
//! been open longer than the budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::error::AttemptTimeout;

/// Retry and timeout settings for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Timeout applied to each attempt on its own.
    pub attempt_timeout: Duration,
    /// Wall-clock cap on the retry window, measured from the first attempt.
    pub budget: Duration,
    /// Delay unit doubled per attempt index.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(120),
            budget: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Final result of a retry loop.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts made after the first one.
    pub retries: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Per-loop bookkeeping, owned by the call running the loop.
struct RetryState {
    attempt: u32,
    window_start: Instant,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            attempt_timeout,
            ..Self::default()
        }
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn backoff(mut self, base_delay: Duration, max_jitter: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_jitter = max_jitter;
        self
    }

    /// Delay before attempt `attempt`, given a jitter sample in `[0, 1)`.
    pub fn backoff_delay(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let multiplier = 2f64.powi(attempt.min(16) as i32);
        let secs = self.base_delay.as_secs_f64() * multiplier
            + self.max_jitter.as_secs_f64() * jitter_unit.clamp(0.0, 1.0);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails terminally, or retries run out.
    ///
    /// `op` receives the attempt index. An attempt that overruns
    /// `attempt_timeout` yields `E::from(AttemptTimeout)`, which the caller's
    /// predicate decides about like any other error.
    pub async fn execute<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AttemptTimeout> + std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut state = RetryState {
            attempt: 0,
            window_start: Instant::now(),
        };

        loop {
            let result = match timeout(self.attempt_timeout, op(state.attempt)).await {
                Ok(result) => result,
                Err(_) => Err(E::from(AttemptTimeout(self.attempt_timeout))),
            };

            let err = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        retries: state.attempt,
                    }
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                debug!(attempt = state.attempt, error = %err, "terminal error, not retrying");
                return RetryOutcome {
                    result: Err(err),
                    retries: state.attempt,
                };
            }

            if state.attempt >= self.max_retries {
                warn!(attempts = state.attempt + 1, error = %err, "retries exhausted");
                return RetryOutcome {
                    result: Err(err),
                    retries: state.attempt,
                };
            }

            let elapsed = state.window_start.elapsed();
            if elapsed > self.budget {
                warn!(
                    attempts = state.attempt + 1,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "retry budget spent"
                );
                return RetryOutcome {
                    result: Err(err),
                    retries: state.attempt,
                };
            }

            state.attempt += 1;
            let jitter_unit: f64 = rand::thread_rng().gen();
            let delay = self
                .backoff_delay(state.attempt, jitter_unit)
                .min(self.budget - elapsed);
            debug!(
                attempt = state.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            sleep(delay).await;
        }
    }
}
