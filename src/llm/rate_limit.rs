//! Per-provider token-bucket admission control.
//!
//! `try_acquire()` never waits: the bucket is refilled lazily from the
//! elapsed time since the last call, and the caller either gets a token
//! immediately or is told to move on to the next provider in its chain.
//! Each bucket serializes only its own state; buckets for different
//! providers never contend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{Clock, elapsed_between};

/// Bucket sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum burst.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // 60 requests/minute with a one-minute burst.
        Self {
            capacity: 60,
            refill_per_second: 1.0,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Snapshot of a bucket for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub available: f64,
    pub capacity: u32,
    pub granted: u64,
    pub denied: u64,
}

/// Token bucket for a single provider.
pub struct TokenBucket {
    name: String,
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
    granted: AtomicU64,
    denied: AtomicU64,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(name: impl Into<String>, config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.capacity),
                last_refill: now,
            }),
            clock,
            granted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take one token if available. Returns immediately either way.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let granted = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            self.refill(&mut state, now);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                true
            } else {
                false
            }
        };

        if granted {
            self.granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(provider = %self.name, "rate limiter denied request");
        }
        granted
    }

    /// Tokens currently available (after a lazy refill).
    pub fn available(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, now);
        state.tokens
    }

    /// Refill to capacity and clear counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens = f64::from(self.config.capacity);
        state.last_refill = now;
        self.granted.store(0, Ordering::Relaxed);
        self.denied.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            available: self.available(),
            capacity: self.config.capacity,
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }

    fn refill(&self, state: &mut BucketState, now: DateTime<Utc>) {
        let elapsed = elapsed_between(state.last_refill, now).as_secs_f64();
        let capacity = f64::from(self.config.capacity);
        state.tokens = (state.tokens + elapsed * self.config.refill_per_second).min(capacity);
        state.tokens = state.tokens.max(0.0);
        if now > state.last_refill {
            state.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn bucket(capacity: u32, rate: f64) -> (TokenBucket, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let bucket = TokenBucket::new(
            "test",
            RateLimiterConfig {
                capacity,
                refill_per_second: rate,
            },
            clock.clone(),
        );
        (bucket, clock)
    }

    #[test]
    fn burst_then_deny_then_refill() {
        let (bucket, clock) = bucket(10, 2.0);

        for i in 0..10 {
            assert!(bucket.try_acquire(), "acquire #{i} should succeed");
        }
        assert!(!bucket.try_acquire(), "11th acquire should be denied");

        clock.advance(Duration::from_secs(1));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        let stats = bucket.stats();
        assert_eq!(stats.granted, 12);
        assert_eq!(stats.denied, 2);
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let (bucket, clock) = bucket(5, 10.0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(bucket.available(), 5.0);
    }

    #[test]
    fn fractional_refill_accumulates() {
        let (bucket, clock) = bucket(1, 2.0);
        assert!(bucket.try_acquire());
        clock.advance(Duration::from_millis(250));
        assert!(!bucket.try_acquire());
        clock.advance(Duration::from_millis(250));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn reset_refills() {
        let (bucket, _clock) = bucket(2, 0.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        bucket.reset();
        assert!(bucket.try_acquire());
        assert_eq!(bucket.stats().granted, 1);
    }

    #[test]
    fn concurrent_acquires_never_overdraw() {
        let (bucket, _clock) = bucket(100, 0.0);
        let bucket = Arc::new(bucket);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&bucket);
                std::thread::spawn(move || (0..50).filter(|_| b.try_acquire()).count())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert_eq!(bucket.available(), 0.0);
    }
}
