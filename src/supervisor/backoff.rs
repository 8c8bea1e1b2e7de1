// src/supervisor/backoff.rs

use std::time::Duration;

/// Delay between relaunch attempts that fail to start, doubling per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaunchBackoff {
    pub first: Duration,
    pub max: Duration,
}

impl Default for RelaunchBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

impl RelaunchBackoff {
    /// No delay at all.
    pub const NONE: Self = Self {
        first: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Delay after the `failures`-th consecutive failed launch (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.first
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let backoff = RelaunchBackoff {
            first: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn none_never_waits() {
        assert_eq!(RelaunchBackoff::NONE.delay(3), Duration::ZERO);
    }
}
