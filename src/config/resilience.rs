use crate::config::helpers::{invalid, parse_millis_env, parse_optional_env, parse_secs_env};
use crate::error::ConfigError;
use crate::llm::circuit_breaker::CircuitBreakerConfig;
use crate::llm::rate_limit::RateLimiterConfig;
use crate::llm::retry::RetryPolicy;

/// Breaker, limiter and retry tuning, applied to every provider.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub breaker: CircuitBreakerConfig,
    pub limiter: RateLimiterConfig,
    pub retry: RetryPolicy,
}

impl ResilienceConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let breaker = CircuitBreakerConfig {
            failure_threshold: parse_optional_env(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker.failure_threshold,
            )?,
            success_threshold: parse_optional_env(
                "BREAKER_SUCCESS_THRESHOLD",
                defaults.breaker.success_threshold,
            )?,
            reset_timeout: parse_secs_env("BREAKER_RESET_TIMEOUT_SECS", defaults.breaker.reset_timeout)?,
        };
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(invalid("BREAKER_*_THRESHOLD", "thresholds must be at least 1"));
        }

        // Requests per minute, refilled continuously.
        let per_minute: u32 = parse_optional_env("RATE_LIMIT_PER_MINUTE", defaults.limiter.capacity)?;
        if per_minute == 0 {
            return Err(invalid("RATE_LIMIT_PER_MINUTE", "must be greater than zero"));
        }
        let limiter = RateLimiterConfig {
            capacity: parse_optional_env("RATE_LIMIT_BURST", per_minute)?,
            refill_per_second: f64::from(per_minute) / 60.0,
        };

        let retry = RetryPolicy {
            max_attempts: parse_optional_env("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_delay: parse_millis_env("RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay)?,
            max_delay: parse_millis_env("RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
            multiplier: parse_optional_env("RETRY_MULTIPLIER", defaults.retry.multiplier)?,
            jitter: (
                parse_optional_env("RETRY_JITTER_MIN", defaults.retry.jitter.0)?,
                parse_optional_env("RETRY_JITTER_MAX", defaults.retry.jitter.1)?,
            ),
        };
        if retry.max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", "must be at least 1"));
        }
        if retry.multiplier < 1.0 {
            return Err(invalid("RETRY_MULTIPLIER", "must be at least 1.0"));
        }
        if retry.jitter.0 <= 0.0 || retry.jitter.0 > retry.jitter.1 {
            return Err(invalid("RETRY_JITTER_MIN", "jitter range must satisfy 0 < min <= max"));
        }
        if retry.max_delay < retry.initial_delay {
            return Err(invalid("RETRY_MAX_DELAY_MS", "must not be below RETRY_INITIAL_DELAY_MS"));
        }

        Ok(Self {
            breaker,
            limiter,
            retry,
        })
    }
}
