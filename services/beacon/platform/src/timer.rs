//! The single lifecycle timer.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// One reusable timer handle with at most one pending firing
#[derive(Debug, Default)]
pub struct LifecycleTimer {
    deadline: Option<Instant>,
    period: Option<Duration>,
}

impl LifecycleTimer {
    /// Disarmed timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a firing after `delay`, replacing any pending one
    pub fn arm(&mut self, delay: Duration, repeat: bool) {
        self.deadline = Some(Instant::now() + delay);
        self.period = repeat.then_some(delay);
    }

    /// Drop the pending firing; harmless when nothing is pending
    pub fn disarm(&mut self) {
        self.deadline = None;
        self.period = None;
    }

    /// Whether a firing is pending
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve at the pending deadline, never when disarmed
    ///
    /// Cancel safe: dropping the future before it resolves keeps the firing pending.
    pub async fn fired(&mut self) {
        let Some(deadline) = self.deadline else {
            return std::future::pending().await;
        };
        sleep_until(deadline).await;
        self.deadline = self.period.map(|period| deadline + period);
    }
}
