//! Per-connection sliding-window rate limiting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::RateLimitError;

/// Configuration for the sliding-window limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum frames admitted per window.
    pub limit: usize,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs_f64(1.0),
        }
    }
}

/// A monotonically-growing queue of admitted-frame timestamps for one connection.
///
/// Not `Send`-shared directly; callers guard it behind a `Mutex` (see
/// `Registry`), matching the per-connection granularity the spec requires.
#[derive(Debug, Default)]
pub struct RateLimiter {
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a frame at `now` under `config`, or rejects it.
    ///
    /// Expired entries are evicted first. On rejection, nothing is mutated
    /// beyond that eviction -- the rejected frame itself is never recorded,
    /// per the spec's "drop the frame without mutating other state" rule.
    pub fn check_and_record(
        &mut self,
        now: Instant,
        config: &RateLimitConfig,
    ) -> Result<(), RateLimitError> {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > config.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if self.timestamps.len() >= config.limit {
            return Err(RateLimitError {
                limit: config.limit,
                window_secs: config.window.as_secs_f64(),
            });
        }

        self.timestamps.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_within_window() {
        let mut limiter = RateLimiter::new();
        let config = RateLimitConfig { limit: 10, window: Duration::from_secs(1) };
        let start = Instant::now();

        for _ in 0..10 {
            assert!(limiter.check_and_record(start, &config).is_ok());
        }
    }

    #[test]
    fn rejects_the_eleventh_frame_within_the_window() {
        let mut limiter = RateLimiter::new();
        let config = RateLimitConfig { limit: 10, window: Duration::from_secs(1) };
        let start = Instant::now();

        for _ in 0..10 {
            limiter.check_and_record(start, &config).unwrap();
        }
        let err = limiter.check_and_record(start, &config).unwrap_err();
        assert_eq!(err.limit, 10);
    }

    #[test]
    fn admits_again_after_the_window_elapses() {
        let mut limiter = RateLimiter::new();
        let config = RateLimitConfig { limit: 10, window: Duration::from_secs(1) };
        let start = Instant::now();

        for _ in 0..10 {
            limiter.check_and_record(start, &config).unwrap();
        }
        assert!(limiter.check_and_record(start, &config).is_err());

        let later = start + Duration::from_millis(1001);
        assert!(limiter.check_and_record(later, &config).is_ok());
    }

    #[test]
    fn rejected_frame_is_not_recorded() {
        let mut limiter = RateLimiter::new();
        let config = RateLimitConfig { limit: 1, window: Duration::from_secs(1) };
        let start = Instant::now();

        limiter.check_and_record(start, &config).unwrap();
        assert!(limiter.check_and_record(start, &config).is_err());
        assert!(limiter.check_and_record(start, &config).is_err());
        assert_eq!(limiter.timestamps.len(), 1);
    }
}
