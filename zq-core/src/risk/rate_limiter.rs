//! Order-submission rate limiting
//!
//! Token bucket refilled continuously at `tokens_per_minute / 60` per
//! second, with the full per-minute budget as burst capacity. The risk
//! engine consumes one token per accepted submission and rejects with
//! `OrderRateExceeded` once the bucket runs dry.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter, clock injectable for tests via `allow_at`.
#[derive(Debug)]
pub struct RateLimiter {
    tokens_per_minute: u32,
    state: Mutex<BucketState>,
    total_allowed: AtomicU64,
    total_rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(tokens_per_minute: u32) -> Self {
        Self {
            tokens_per_minute,
            state: Mutex::new(BucketState {
                tokens: tokens_per_minute as f64,
                last_refill: Instant::now(),
            }),
            total_allowed: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> u32 {
        self.tokens_per_minute
    }

    /// Consume one token if available.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refill = elapsed.as_secs_f64() * self.tokens_per_minute as f64 / 60.0;
        state.tokens = (state.tokens + refill).min(self.tokens_per_minute as f64);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            self.total_allowed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Peek without consuming; used by the pure risk evaluation.
    pub fn would_allow(&self) -> bool {
        let state = self.state.lock();
        let elapsed = state.last_refill.elapsed();
        let refill = elapsed.as_secs_f64() * self.tokens_per_minute as f64 / 60.0;
        (state.tokens + refill).min(self.tokens_per_minute as f64) >= 1.0
    }

    pub fn allowed(&self) -> u64 {
        self.total_allowed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_up_to_budget() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
        assert_eq!(limiter.allowed(), 5);
        assert_eq!(limiter.rejected(), 1);
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = RateLimiter::new(60); // one token per second
        let start = Instant::now();
        for _ in 0..60 {
            assert!(limiter.allow_at(start));
        }
        assert!(!limiter.allow_at(start));
        // One second later exactly one token has refilled.
        assert!(limiter.allow_at(start + Duration::from_secs(1)));
        assert!(!limiter.allow_at(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_refill_caps_at_budget() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        assert!(limiter.allow_at(start));
        // A long idle period must not bank more than the budget.
        let later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at(later));
        assert!(limiter.allow_at(later));
        assert!(!limiter.allow_at(later));
    }
}
