//! Retry policy for failed jobs.
//!
//! Implements exponential backoff with optional random jitter.

use super::job::JobError;
use crate::config::WorkerSettings;
use chrono::{DateTime, Utc};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total executions allowed, the first one included.
    pub max_attempts: u32,
    /// Delay before the second execution, in seconds.
    pub initial_backoff_secs: u64,
    /// Cap for exponential growth, in seconds.
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each failed execution.
    pub backoff_multiplier: f64,
    /// Fraction of the backoff added at random (0.0 disables jitter).
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(settings: &WorkerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
            jitter: settings.jitter,
        }
    }

    /// Backoff after the given number of executions, without jitter.
    ///
    /// `initial_backoff * multiplier^(executions - 1)`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, executions: u32) -> u64 {
        let exponent = executions.saturating_sub(1) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// When the next attempt should run after `executions` executions.
    ///
    /// Delays past the representable range run at the latest possible time.
    pub fn next_retry_at(&self, executions: u32) -> DateTime<Utc> {
        let backoff_ms = self.backoff_secs(executions) as f64 * 1000.0;
        let jitter_ms = if self.jitter > 0.0 && backoff_ms > 0.0 {
            rand::rng().random_range(0.0..=self.jitter) * backoff_ms
        } else {
            0.0
        };
        let now = Utc::now();
        chrono::Duration::try_milliseconds((backoff_ms + jitter_ms) as i64)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn should_retry(&self, error: &JobError, executions: u32) -> bool {
        error.is_retryable() && executions < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&WorkerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff_secs: 3,
            max_backoff_secs: 60,
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = policy();
        assert_eq!(policy.backoff_secs(1), 3);
        assert_eq!(policy.backoff_secs(2), 6);
        assert_eq!(policy.backoff_secs(3), 12);
        assert_eq!(policy.backoff_secs(4), 24);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_secs(6), 60);
        assert_eq!(policy.backoff_secs(30), 60);
    }

    #[test]
    fn test_zero_executions_uses_initial_backoff() {
        assert_eq!(policy().backoff_secs(0), 3);
    }

    #[test]
    fn test_should_retry() {
        let policy = policy();
        let transient = JobError::ExecutionFailed("locked".to_string());

        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 4));
        assert!(!policy.should_retry(&transient, 5));
        assert!(!policy.should_retry(&JobError::RecordNotFound("x".to_string()), 1));
    }

    #[test]
    fn test_next_retry_at_without_jitter() {
        let policy = policy();
        let before = Utc::now();
        let next = policy.next_retry_at(2);

        let delay = (next - before).num_milliseconds();
        assert!((6000..7000).contains(&delay), "delay was {}ms", delay);
    }

    #[test]
    fn test_next_retry_at_saturates_huge_backoff() {
        let policy = RetryPolicy {
            initial_backoff_secs: u64::MAX,
            max_backoff_secs: u64::MAX,
            ..policy()
        };
        assert_eq!(policy.next_retry_at(3), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_next_retry_at_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..policy()
        };
        for _ in 0..20 {
            let before = Utc::now();
            let delay = (policy.next_retry_at(1) - before).num_milliseconds();
            assert!((3000..=4600).contains(&delay), "delay was {}ms", delay);
        }
    }
}
