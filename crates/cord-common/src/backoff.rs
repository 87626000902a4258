//! Exponential backoff with jitter
//!
//! Shared by gateway reconnects, shard restarts and REST retries.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff state
///
/// Each call to [`Backoff::next_delay`] doubles the delay, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff with jitter enabled
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: true,
            attempt: 0,
        }
    }

    /// Create from millisecond values as they appear in configuration
    #[must_use]
    pub const fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
        )
    }

    /// Enable or disable jitter
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a given attempt number, without advancing state
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * 2f64.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());

        let secs = if self.jitter {
            // 0.5x to 1.5x, then re-capped
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            (capped * factor).min(self.max.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Uniformly random duration in `[min, max]`
#[must_use]
pub fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_secs_f64();
    min + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=span))
}
