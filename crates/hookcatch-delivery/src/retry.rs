//! Retry budget and backoff schedule.
//!
//! Backoff is a fixed table indexed by `attempts - 1`; indices past the end
//! reuse the last entry. Kept free of queue and storage concerns so the
//! policy can be tested on its own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempts allowed before a delivery is dead-lettered.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay after attempts 1, 2 and 3+.
pub const DEFAULT_BACKOFF_SCHEDULE: [Duration; 3] =
    [Duration::from_secs(30), Duration::from_secs(120), Duration::from_secs(600)];

/// Retry budget and backoff table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed, including the first.
    pub max_attempts: u32,

    /// Delay before the next attempt, indexed by `attempts - 1`.
    pub backoff_schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: MAX_ATTEMPTS, backoff_schedule: DEFAULT_BACKOFF_SCHEDULE.to_vec() }
    }
}

impl RetryPolicy {
    /// Builds a policy from a schedule in whole seconds.
    pub fn from_secs(max_attempts: u32, schedule: &[u64]) -> Self {
        Self {
            max_attempts,
            backoff_schedule: schedule.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// Delay to wait after `attempts` attempts have run.
    ///
    /// An empty schedule retries immediately.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);

        self.backoff_schedule
            .get(index)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or_default()
    }

    /// Whether `attempts` has used up the budget.
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Inputs for deciding what happens after a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Attempts run so far, including the one that just failed.
    pub attempt_number: u32,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// Backoff to wait.
        delay: Duration,
        /// `failed_at + delay`.
        next_attempt_at: DateTime<Utc>,
    },
    /// Budget exhausted, dead-letter the delivery.
    GiveUp {
        /// Why no retry will happen.
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a retry context for a failed attempt.
    pub fn new(attempt_number: u32, failed_at: DateTime<Utc>, policy: &'a RetryPolicy) -> Self {
        Self { attempt_number, failed_at, policy }
    }

    /// Decides whether and when to retry.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.policy.is_exhausted(self.attempt_number) {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.policy.max_attempts),
            };
        }

        let delay = self.policy.backoff_for(self.attempt_number);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { delay, next_attempt_at: self.failed_at + chrono_delay }
    }
}
