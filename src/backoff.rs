//! Capped exponential backoff with jitter for reconnection attempts.

use std::time::Duration;

use rand::Rng;

use crate::constants::RECONNECT_JITTER_MIN;

/// Reconnection delay schedule.
///
/// Each call to [`Backoff::next_delay`] doubles the base delay up to the cap;
/// the returned delay is the base scaled by a random factor in
/// `[RECONNECT_JITTER_MIN, 1.0]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a schedule starting at `initial`, never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        let factor = rand::rng().random_range(RECONNECT_JITTER_MIN..=1.0);
        base.mul_f64(factor)
    }

    /// Return to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Base delay of the next attempt, before jitter.
    pub fn current(&self) -> Duration {
        self.current
    }
}
