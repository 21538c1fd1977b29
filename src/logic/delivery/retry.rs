//! Linear retry schedule

use std::time::Duration;

use uuid::Uuid;

/// `max_attempts` total tries; the wait before retry `k` is `step * k`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            step,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based), or `None`
    /// once attempts are exhausted
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.step * attempt)
        }
    }

    /// Every delay this policy can produce, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|k| self.step * k).collect()
    }
}

/// In-flight retry state for one delivery unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    pub batch: Uuid,
    pub attempt: u32,
    pub next_delay: Option<Duration>,
}
