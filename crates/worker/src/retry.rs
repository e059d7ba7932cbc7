//! Bounded-retry decision logic.
//!
//! A failed message is either republished with an incremented retry count
//! or dead-lettered. The policy is a pure function of the retry count: the
//! delay is fixed and only eligibility depends on how many hops the
//! message has already made.

use std::time::Duration;

/// Default number of failed attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-message expiration applied to republished copies.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

/// What to do with a message whose processing just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish with `retry_count` in the headers and `delay` as the
    /// message expiration.
    Retry { retry_count: u32, delay: Duration },
    /// Retries are exhausted; reject without requeue.
    DeadLetter,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `true` iff `retry_count < max_retries`.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the next attempt. The retry count does not change it.
    pub fn next_delay(&self, _retry_count: u32) -> Duration {
        self.retry_delay
    }

    /// Decide the fate of a message that has already been retried
    /// `prior_retries` times and has just failed again.
    ///
    /// Eligibility is judged on the count the message would carry after
    /// this hop, so a message is processed at most `max_retries` times in
    /// total and dead-lettered on its `max_retries`-th failure.
    pub fn decide(&self, prior_retries: u32) -> RetryDecision {
        let retry_count = prior_retries.saturating_add(1);
        if self.should_retry(retry_count) {
            RetryDecision::Retry {
                retry_count,
                delay: self.next_delay(retry_count),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}
