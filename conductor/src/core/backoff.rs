//! Poll schedule for the readiness wait.

use std::time::{Duration, Instant};

/// Bounded polling with exponential backoff and an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub deadline: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(30),
        }
    }
}

impl WaitPolicy {
    /// Interval to use after `current` missed.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

/// Return how long to sleep before the next poll, clipped to the deadline.
///
/// Returns `None` once the deadline has passed.
pub fn next_sleep(deadline: Instant, now: Instant, interval: Duration) -> Option<Duration> {
    let remaining = deadline
        .checked_duration_since(now)
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return None;
    }
    Some(interval.min(remaining))
}
