//! Retry with exponential backoff, breaker accounting and a fallback hook.
//!
//! The executor wraps one provider's call. Retryable failures (timeout,
//! rate limiting, transient server errors) are retried after
//! `min(max_delay, initial_delay * multiplier^attempt) * jitter`; a
//! server-suggested `Retry-After` replaces the computed delay, capped at
//! `max_delay`. Non-retryable failures propagate on first occurrence.
//!
//! Every attempt is reported to the provider's [`CircuitBreaker`]. When the
//! breaker refuses admission the executor goes straight to the fallback
//! without consuming an attempt, and a failure that opens the breaker ends
//! the retries without waiting out the backoff. Once attempts are exhausted the fallback is
//! invoked exactly once, or the last error is returned when there is none.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::RouteError;
use crate::llm::circuit_breaker::CircuitBreaker;

/// Backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts against one provider, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Inclusive multiplicative jitter range applied to each delay.
    pub jitter: (f64, f64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: (0.8, 1.2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (0-based `attempt`).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let base_secs = self.initial_delay.as_secs_f64() * exp;
        let capped = base_secs.min(self.max_delay.as_secs_f64());

        let (lo, hi) = self.jitter;
        let factor = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        Duration::try_from_secs_f64((capped * factor).max(0.0)).unwrap_or(self.max_delay)
    }
}

/// Errors the executor knows how to classify.
pub trait RetryableError: std::fmt::Display + Sized {
    /// Whether another attempt against the same provider may succeed.
    fn should_retry(&self) -> bool;

    /// Server-suggested wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Error produced when the breaker refuses admission and nothing else
    /// is left to try.
    fn circuit_open(provider: &str) -> Self;
}

impl RetryableError for RouteError {
    fn should_retry(&self) -> bool {
        matches!(
            self,
            RouteError::RateLimited { .. } | RouteError::TransientServer { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RouteError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn circuit_open(provider: &str) -> Self {
        RouteError::AllProvidersUnavailable {
            attempted: vec![provider.to_string()],
            last_error: Some(format!("circuit open for {provider}")),
        }
    }
}

/// Result of an executor run.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Calls made to the wrapped operation (fallback excluded).
    pub attempts: u32,
    /// Backoff sleeps taken between attempts.
    pub backoff_waits: u32,
    /// Whether `result` came from the fallback.
    pub via_fallback: bool,
}

/// Retry executor bound to a policy.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` with retries and no fallback.
    pub async fn execute<T, E, Op, Fut>(
        &self,
        breaker: &CircuitBreaker,
        op: Op,
    ) -> RetryOutcome<T, E>
    where
        E: RetryableError,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(breaker, op, None::<fn() -> std::future::Ready<Result<T, E>>>)
            .await
    }

    /// Run `op` with retries, invoking `fallback` once if it never succeeds
    /// with a retryable failure or the breaker refuses admission.
    pub async fn execute_with_fallback<T, E, Op, Fut, Fb, FbFut>(
        &self,
        breaker: &CircuitBreaker,
        op: Op,
        fallback: Fb,
    ) -> RetryOutcome<T, E>
    where
        E: RetryableError,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        self.run(breaker, op, Some(fallback)).await
    }

    async fn run<T, E, Op, Fut, Fb, FbFut>(
        &self,
        breaker: &CircuitBreaker,
        mut op: Op,
        fallback: Option<Fb>,
    ) -> RetryOutcome<T, E>
    where
        E: RetryableError,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut backoff_waits = 0;
        let mut last_error: Option<E> = None;

        while attempts < max_attempts {
            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    tracing::warn!(
                        provider = %open.provider,
                        retry_in_ms = open.retry_in.as_millis() as u64,
                        "Circuit open, skipping to fallback"
                    );
                    break;
                }
            };

            let attempt = attempts;
            attempts += 1;

            match op(attempt).await {
                Ok(value) => {
                    permit.record_success();
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        backoff_waits,
                        via_fallback: false,
                    };
                }
                Err(err) => {
                    permit.record_failure();

                    if !err.should_retry() {
                        return RetryOutcome {
                            result: Err(err),
                            attempts,
                            backoff_waits,
                            via_fallback: false,
                        };
                    }

                    if !breaker.is_call_permitted() {
                        tracing::warn!(
                            provider = %breaker.name(),
                            attempt = attempts,
                            error = %err,
                            "Circuit opened, skipping remaining retries"
                        );
                        last_error = Some(err);
                        break;
                    }

                    if attempts < max_attempts {
                        let delay = match err.retry_after() {
                            Some(suggested) => suggested.min(self.policy.max_delay),
                            None => self.policy.backoff_delay(attempt),
                        };
                        tracing::warn!(
                            provider = %breaker.name(),
                            attempt = attempts,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying provider after transient error"
                        );
                        backoff_waits += 1;
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        if let Some(fallback) = fallback {
            if let Some(err) = &last_error {
                tracing::warn!(
                    provider = %breaker.name(),
                    attempts,
                    error = %err,
                    "Retries exhausted, invoking fallback"
                );
            }
            return RetryOutcome {
                result: fallback().await,
                attempts,
                backoff_waits,
                via_fallback: true,
            };
        }

        RetryOutcome {
            result: Err(last_error.unwrap_or_else(|| E::circuit_open(breaker.name()))),
            attempts,
            backoff_waits,
            via_fallback: false,
        }
    }
}
