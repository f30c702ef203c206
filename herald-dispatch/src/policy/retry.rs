//! Retry policy for send operations.
//!
//! Retries follow a fixed escalation schedule rather than exponential growth:
//! the `n`th failed attempt waits for the `n`th interval, and once the schedule
//! is exhausted its last interval repeats.

use std::time::Duration;

use rand::Rng;

/// Retry policy for send operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failed attempts after which a job is given up.
    max_attempts: u32,

    /// Backoff schedule in seconds. Never empty once validated.
    intervals_secs: Vec<u64>,

    /// Jitter factor for randomizing retry delays.
    ///
    /// The delay is randomized within ±`jitter_factor`.
    jitter_factor: f64,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, intervals_secs: Vec<u64>, jitter_factor: f64) -> Self {
        Self {
            max_attempts,
            intervals_secs,
            jitter_factor,
        }
    }

    /// Check if another attempt should be made after `attempts` failures.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Get the number of remaining attempts.
    ///
    /// Returns `0` if max attempts has been reached.
    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }

    /// Scheduled delay after the `attempts`th failure, before jitter.
    ///
    /// `attempts` is 1-indexed; `0` is treated as the first failure.
    #[must_use]
    pub fn scheduled_delay(&self, attempts: u32) -> Duration {
        let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);
        let secs = self
            .intervals_secs
            .get(index)
            .or_else(|| self.intervals_secs.last())
            .copied()
            .unwrap_or_default();
        Duration::from_secs(secs)
    }

    /// Delay after the `attempts`th failure, with jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let delay = self.scheduled_delay(attempts);
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let secs = delay.as_secs_f64();
        let jitter_range = secs * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((secs + jitter).max(0.0))
    }

    /// The longest interval in the schedule.
    ///
    /// A lead silent for longer than this gets fresh content on its next send.
    #[must_use]
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.intervals_secs.iter().copied().max().unwrap_or_default())
    }
}
