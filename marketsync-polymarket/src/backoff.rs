//! Reconnect delay policy
//!
//! `delay(attempt) = min(base * 2^(attempt - 1) + uniform(0, base), max_delay)`

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with additive jitter, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }

    /// Delay before reconnect `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=base_ms)
        };
        self.delay_with_jitter(attempt, Duration::from_millis(jitter_ms))
    }

    /// Deterministic part of [`Backoff::delay`] with an explicit jitter
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        exponential
            .saturating_add(jitter)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn test_delay_doubles_without_jitter() {
        let b = backoff();
        assert_eq!(b.delay_with_jitter(1, Duration::ZERO), Duration::from_secs(1));
        assert_eq!(b.delay_with_jitter(2, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(b.delay_with_jitter(3, Duration::ZERO), Duration::from_secs(4));
        assert_eq!(b.delay_with_jitter(5, Duration::ZERO), Duration::from_secs(16));
        assert_eq!(b.delay_with_jitter(6, Duration::ZERO), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_bounded_by_max_for_every_attempt() {
        let b = backoff();
        for attempt in 0..=200 {
            let d = b.delay(attempt);
            assert!(d <= b.max_delay, "attempt {} gave {:?}", attempt, d);
        }
        assert_eq!(b.delay_with_jitter(u32::MAX, b.base), b.max_delay);
    }

    #[test]
    fn test_delay_non_decreasing_in_expectation() {
        let b = backoff();
        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            // expectation of uniform(0, base) is base / 2
            let expected = b.delay_with_jitter(attempt, b.base / 2);
            assert!(expected >= previous);
            previous = expected;
        }
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let b = backoff();
        for _ in 0..100 {
            let d = b.delay(2);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(3));
        }
    }
}
