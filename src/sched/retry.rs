//! In-cycle retry policy with exponential backoff.
//!
//! Retries happen inside a single refresh cycle, while the feed's lock is
//! held; backoff never leaks across cycles. A feed whose retries are
//! exhausted is rescheduled at its normal interval, which keeps a
//! permanently-broken feed from generating a retry storm.

use std::time::Duration;

use rand::Rng;

use crate::config::SchedulerConfig;
use crate::FeedLoopError;

/// Maximum random jitter added to each backoff delay, in milliseconds.
const BACKOFF_JITTER_MS: u64 = 250;

/// Retry policy for one refresh cycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    factor: f64,
    cap: Duration,
}

impl RetryPolicy {
    /// Build the policy from the scheduler configuration.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            factor: config.backoff_factor,
            cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// Maximum fetch attempts per cycle.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` (1-based, already executed) may be followed by
    /// another try for this error.
    pub fn should_retry(&self, error: &FeedLoopError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Backoff delay after the given 1-based attempt, without jitter.
    ///
    /// `base * factor^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let millis = self.base.as_millis() as f64 * self.factor.powi(exponent as i32);
        Duration::from_millis(millis as u64).min(self.cap)
    }

    /// Backoff delay with random jitter applied.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        self.backoff(attempt)
            + Duration::from_millis(rand::rng().random_range(0..=BACKOFF_JITTER_MS))
    }

    /// Worst-case total backoff time across a full cycle's retries.
    ///
    /// Useful for validating that the lock TTL covers the retry budget.
    pub fn total_backoff_budget(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff(attempt) + Duration::from_millis(BACKOFF_JITTER_MS))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(30), Duration::from_millis(60_000));
        // Deep attempts do not overflow
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff_with_jitter(1);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2000 + BACKOFF_JITTER_MS));
        }
    }

    #[test]
    fn test_should_retry_retryable_until_budget() {
        let policy = RetryPolicy::default();
        let err = FeedLoopError::RetryableFetch("timeout".to_string());
        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&err, 3));
    }

    #[test]
    fn test_should_not_retry_non_retryable() {
        let policy = RetryPolicy::default();
        let err = FeedLoopError::NonRetryableFetch("HTTP 404".to_string());
        assert!(!policy.should_retry(&err, 1));
    }

    #[test]
    fn test_full_cycle_budget_fits_default_lock_ttl() {
        let config = SchedulerConfig::default();
        let fetch = crate::config::FetchConfig::default();
        let policy = RetryPolicy::from_config(&config);

        // Worst case per cycle: every attempt spends the full rate-limit
        // wait plus the hard timeout, with all backoffs in between. The
        // default lock TTL must absorb all of it.
        let per_attempt = fetch.hard_timeout() + config.domain_max_wait();
        let cycle = per_attempt * policy.max_attempts() + policy.total_backoff_budget();
        assert!(cycle <= config.lock_ttl());
    }

    #[test]
    fn test_max_attempts_floor() {
        let mut config = SchedulerConfig::default();
        config.max_attempts = 0;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts(), 1);
    }
}
