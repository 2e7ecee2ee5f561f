//! Exponential backoff for retry logic
//!
//! Shared by the data engine (provider reconnection) and the execution
//! engine (submit retries). Jitter spreads concurrent retries so they do
//! not hammer the venue in lockstep.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Multiplier applied after each attempt.
    pub multiplier: f64,
    /// Maximum attempts; `None` retries forever.
    pub max_retries: Option<usize>,
    /// Randomisation factor in [0, 1]; 0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: None,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Reconnection profile: 100ms doubling up to 30s, unlimited attempts.
    pub fn reconnect() -> Self {
        Self::default()
    }

    /// Submit-retry profile: base 1s doubling, bounded attempts, no jitter
    /// so the retry intervals are exactly observable.
    pub fn submit_retry(max_retries: usize, base: Duration) -> Self {
        Self {
            initial_delay: base,
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: Some(max_retries),
            jitter_factor: 0.0,
        }
    }
}

/// Exponential backoff state machine.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: usize,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            attempt: 0,
            config,
        }
    }

    /// Next delay, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return None;
            }
        }

        let delay = self.jittered(self.current_delay);
        self.attempt += 1;
        self.current_delay = std::cmp::min(
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.config.multiplier),
            self.config.max_delay,
        );
        Some(delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen::<f64>() * self.config.jitter_factor;
        let multiplier = 1.0 + (jitter - self.config.jitter_factor / 2.0);
        Duration::from_secs_f64(delay.as_secs_f64() * multiplier)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn can_retry(&self) -> bool {
        self.config.max_retries.map_or(true, |max| self.attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            max_retries: None,
            jitter_factor: 0.0,
        });

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn test_exhausts_after_max_retries() {
        let mut backoff =
            ExponentialBackoff::new(BackoffConfig::submit_retry(3, Duration::from_secs(1)));

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_delay(), None);
        assert!(!backoff.can_retry());
    }

    #[test]
    fn test_reset() {
        let mut backoff =
            ExponentialBackoff::new(BackoffConfig::submit_retry(2, Duration::from_millis(10)));
        backoff.next_delay();
        backoff.next_delay();
        assert!(!backoff.can_retry());
        backoff.reset();
        assert!(backoff.can_retry());
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..Default::default()
        });
        for _ in 0..20 {
            backoff.reset();
            let delay = backoff.next_delay().unwrap();
            let ms = delay.as_millis() as f64;
            assert!((890.0..=1110.0).contains(&ms), "jittered delay {ms}ms");
        }
    }
}
