//! Two-tier reconnect policy for failed stream connects.

use std::time::Duration;

use crate::config::{Timings, FAILURE_THRESHOLD, LONG_BACKOFF, SHORT_BACKOFF};

/// Consecutive stream-connect failures since the last success
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter(u32);

impl RetryCounter {
    /// Count one more failure and return the new total
    pub fn increment(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    /// Back to zero
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// Current count
    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Outcome of consulting the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// How long to wait before the next attempt
    pub delay: Duration,
    /// Whether the caller must reset its failure counter (long tier)
    pub reset: bool,
}

/// Short delay until the threshold, then one long delay and a counter reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    threshold: u32,
    short: Duration,
    long: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            threshold: FAILURE_THRESHOLD,
            short: SHORT_BACKOFF,
            long: LONG_BACKOFF,
        }
    }
}

impl ReconnectPolicy {
    /// Policy using the backoff tiers from `timings`
    pub fn new(timings: &Timings) -> Self {
        Self {
            threshold: timings.failure_threshold,
            short: timings.short_backoff,
            long: timings.long_backoff,
        }
    }

    /// Delay for the given failure count, already incremented by the caller
    pub fn next_delay(&self, failure_count: u32) -> Backoff {
        if failure_count >= self.threshold {
            Backoff {
                delay: self.long,
                reset: true,
            }
        } else {
            Backoff {
                delay: self.short,
                reset: false,
            }
        }
    }
}

/// [`ReconnectPolicy::next_delay`] with the default tiers
pub fn next_delay(failure_count: u32) -> Backoff {
    ReconnectPolicy::default().next_delay(failure_count)
}
