//! Retry policy for failed component builds.

use std::time::Duration;

use rand::Rng;

/// Decides whether a failed build is retried automatically, and after how
/// long.
///
/// Retries are capped by consecutive failures, never by elapsed time. Past
/// the cap only an explicit fix action brings a job back to `building`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failures after which auto-retry stops.
    pub max_consecutive_failures: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Random spread applied by `jittered_delay`, as a fraction of the delay
    /// (0.1 = +/-10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy with no backoff, for tests and local runs.
    pub fn immediate(max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures,
            base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, consecutive_failures: u32) -> bool {
        consecutive_failures < self.max_consecutive_failures
    }

    /// Delay before the retry that follows `failures` consecutive failures:
    /// `base_delay * multiplier^(failures - 1)`, capped at `max_delay`.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// `next_delay` spread by `jitter`, so retries of jobs that failed
    /// together do not fire together. Never exceeds `max_delay`.
    pub fn jittered_delay(&self, failures: u32) -> Duration {
        let delay = self.next_delay(failures);
        if delay.is_zero() || self.jitter <= 0.0 {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        delay.mul_f64(factor).min(self.max_delay)
    }
}
