//! Lifecycle timing and endpoint configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::descriptor::Protocol;
use crate::error::LifecycleError;
use crate::establisher::Announcement;

/// Cadence of link polls while associating or after a link error
pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Delay before re-verifying the link after the transport refused a connect outright
pub const REJECT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Retry delay for the first failures after a success
pub const SHORT_BACKOFF: Duration = Duration::from_millis(2000);

/// Retry delay once the failure threshold is reached
pub const LONG_BACKOFF: Duration = Duration::from_millis(10000);

/// Consecutive stream-connect failures that escalate to [`LONG_BACKOFF`]
pub const FAILURE_THRESHOLD: u32 = 5;

/// Every delay and threshold the lifecycle uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Interval between link polls
    pub link_poll: Duration,
    /// Delay after an immediate connect rejection
    pub reject_retry: Duration,
    /// Short backoff tier
    pub short_backoff: Duration,
    /// Long backoff tier
    pub long_backoff: Duration,
    /// Failures that trigger the long tier
    pub failure_threshold: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            link_poll: LINK_POLL_INTERVAL,
            reject_retry: REJECT_RETRY_DELAY,
            short_backoff: SHORT_BACKOFF,
            long_backoff: LONG_BACKOFF,
            failure_threshold: FAILURE_THRESHOLD,
        }
    }
}

impl Timings {
    /// Reject zero delays and a zero threshold
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.link_poll.is_zero() {
            return Err(LifecycleError::Timing("link_poll"));
        }
        if self.reject_retry.is_zero() {
            return Err(LifecycleError::Timing("reject_retry"));
        }
        if self.short_backoff.is_zero() {
            return Err(LifecycleError::Timing("short_backoff"));
        }
        if self.long_backoff.is_zero() {
            return Err(LifecycleError::Timing("long_backoff"));
        }
        if self.failure_threshold == 0 {
            return Err(LifecycleError::Timing("failure_threshold"));
        }
        Ok(())
    }
}

/// Read-only inputs of a [`crate::Lifecycle`], fixed before it starts
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Remote endpoint of the announcement connection
    pub remote: SocketAddr,
    /// Payload sent on every successful connection
    pub announcement: Announcement,
    /// Delays and thresholds
    pub timings: Timings,
    /// Stream flavour, [`Protocol::SecureStream`] unless changed
    pub protocol: Protocol,
}

impl LifecycleConfig {
    /// Build a config, validating the timings
    pub fn new(
        remote: SocketAddr,
        announcement: Announcement,
        timings: Timings,
    ) -> Result<Self, LifecycleError> {
        timings.validate()?;
        Ok(Self {
            remote,
            announcement,
            timings,
            protocol: Protocol::SecureStream,
        })
    }

    /// Override the stream flavour
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}
