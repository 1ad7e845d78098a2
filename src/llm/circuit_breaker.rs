//! Per-provider circuit breaker.
//!
//! Three states:
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls are short-circuited until `reset_timeout` has elapsed
//!   since the breaker opened.
//! - **HalfOpen**: one trial call at a time is admitted. `success_threshold`
//!   consecutive trial successes close the breaker; any trial failure
//!   re-opens it immediately.
//!
//! Admission hands out a [`BreakerPermit`]. The permit must be resolved with
//! [`BreakerPermit::record_success`] or [`BreakerPermit::record_failure`];
//! a permit dropped unresolved (the caller was cancelled mid-call) releases
//! its trial slot without counting either way.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{Clock, elapsed_between};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds for a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive trial successes in HalfOpen that close it.
    pub success_threshold: u32,
    /// Cool-down before a trial call is admitted.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Returned by [`CircuitBreaker::try_acquire`] when a call is short-circuited.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for provider {provider}")]
pub struct BreakerOpen {
    pub provider: String,
    /// Remaining cool-down, zero when a HalfOpen trial is already in flight.
    pub retry_in: Duration,
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub failure_rate: f64,
    pub open_count: u64,
    pub rejected: u64,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    total_requests: u64,
    total_failures: u64,
    open_count: u64,
    rejected: u64,
}

impl BreakerInner {
    fn fresh() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            opened_at: None,
            trial_in_flight: false,
            total_requests: 0,
            total_failures: 0,
            open_count: 0,
            rejected: 0,
        }
    }
}

/// Circuit breaker guarding a single provider.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::fresh()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state. An Open breaker whose cool-down has passed
    /// still reports Open until the next admission attempt moves it on.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether `try_acquire` would currently admit a call, without changing
    /// any state.
    pub fn is_call_permitted(&self) -> bool {
        let now = self.clock.now();
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(&inner, now),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Ask to make a call.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, BreakerOpen> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            if self.cooldown_elapsed(&inner, now) {
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.trial_in_flight = false;
                tracing::info!(provider = %self.name, "circuit breaker half-open, admitting trial call");
            } else {
                inner.rejected += 1;
                let since = inner
                    .opened_at
                    .map(|at| elapsed_between(at, now))
                    .unwrap_or_default();
                return Err(BreakerOpen {
                    provider: self.name.clone(),
                    retry_in: self.config.reset_timeout.saturating_sub(since),
                });
            }
        }

        match inner.state {
            CircuitState::HalfOpen if inner.trial_in_flight => {
                inner.rejected += 1;
                Err(BreakerOpen {
                    provider: self.name.clone(),
                    retry_in: Duration::ZERO,
                })
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(BreakerPermit::new(self, true))
            }
            _ => Ok(BreakerPermit::new(self, false)),
        }
    }

    /// Return to a fresh Closed breaker and clear all counters.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::fresh();
        tracing::info!(provider = %self.name, "circuit breaker reset");
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let failure_rate = if inner.total_requests == 0 {
            0.0
        } else {
            inner.total_failures as f64 / inner.total_requests as f64
        };
        BreakerStats {
            state: inner.state,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            failure_rate,
            open_count: inner.open_count,
            rejected: inner.rejected,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner, now: DateTime<Utc>) -> bool {
        inner
            .opened_at
            .is_none_or(|at| elapsed_between(at, now) >= self.config.reset_timeout)
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.total_requests += 1;
        if trial {
            inner.trial_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    tracing::info!(provider = %self.name, "circuit breaker closed, provider recovered");
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.total_requests += 1;
        inner.total_failures += 1;
        inner.last_failure_at = Some(now);
        if trial {
            inner.trial_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen if trial => self.open(&mut inner, now),
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: DateTime<Utc>) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.consecutive_successes = 0;
        inner.open_count += 1;
        tracing::warn!(
            provider = %self.name,
            consecutive_failures = inner.consecutive_failures,
            reset_timeout_secs = self.config.reset_timeout.as_secs(),
            "circuit breaker opened"
        );
    }

    fn release_unrecorded(&self, trial: bool) {
        if trial {
            self.lock().trial_in_flight = false;
        }
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
#[must_use = "a permit must be resolved with record_success or record_failure"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this call is a HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release_unrecorded(self.trial);
        }
    }
}
