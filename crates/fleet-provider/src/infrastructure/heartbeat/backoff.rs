//! Reconnect delay policy.

use std::time::Duration;

/// Linear backoff: `step`, `2 * step`, `3 * step`, … capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    step: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            failures: 0,
        }
    }

    /// Records a failed attempt and returns how long to wait before the next.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.step.saturating_mul(self.failures).min(self.max)
    }

    /// Forgets past failures after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_by_one_step_until_capped() {
        // Arrange
        let mut backoff = Backoff::default();

        // Act
        let delays: Vec<u64> = (0..32).map(|_| backoff.next_delay().as_secs()).collect();

        // Assert
        assert_eq!(&delays[..3], &[1, 2, 3]);
        assert_eq!(delays[29], 30);
        assert_eq!(delays[31], 30);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(25));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(25));

        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
