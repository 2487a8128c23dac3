//! Retry policies with exponential backoff
//!
//! Used in two places: the retry *middleware* (configured from
//! [`Limits`](crate::config::Limits) defaults, retrying transient HTTP
//! failures) and the retry *node* (configured from node data, wrapping its
//! direct successors).
//!
//! Delay for attempt `n` (0-indexed):
//!
//! ```text
//! delay = base * multiplier^n, capped at max_interval
//! if jitter_factor > 0: delay *= random(1 - jitter .. 1 + jitter)
//! ```
//!
//! Jitter spreads simultaneous retries so a burst of failures does not come
//! back as a synchronized burst of retries.

use std::time::Duration;

use rand::Rng;

/// Configuration for retrying a failed call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: usize,

    /// Base delay before the first retry
    pub base: Duration,

    /// Multiplier applied per attempt
    pub multiplier: f64,

    /// Upper bound for any single delay
    pub max_interval: Duration,

    /// Jitter factor in `[0, 1]`; 0 disables jitter
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        let jittered = if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let factor = rng.gen_range(1.0 - self.jitter_factor..=1.0 + self.jitter_factor);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Tracks attempts and the last error across a retry loop
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth_capped() {
        let policy = RetryPolicy::new(5)
            .with_base(Duration::from_secs(1))
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(3));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(3)); // capped
        assert_eq!(policy.delay(5), Duration::from_secs(3));
    }

    #[test]
    fn attempt_accounting() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy::new(3)
            .with_base(Duration::from_secs(1))
            .with_jitter_factor(0.5);
        for _ in 0..50 {
            let d = policy.delay(0).as_secs_f64();
            assert!((0.5..=1.5).contains(&d), "delay {} out of band", d);
        }
    }

    #[test]
    fn state_tracks_attempts() {
        let mut state = RetryState::new();
        state.record_attempt(Some("connection reset".into()));
        state.record_attempt(Some("timeout".into()));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
        state.reset();
        assert_eq!(state.attempts, 0);
    }
}
