//! Process-wide pause gate
//!
//! Set by a global 429 and consulted before any per-route bucket logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomically checked "paused until" gate
#[derive(Debug)]
pub struct GlobalGate {
    origin: Instant,
    /// Milliseconds since `origin`; zero or past means open
    paused_until_ms: AtomicU64,
}

impl GlobalGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            paused_until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Close the gate for `duration`; overlapping pauses keep the latest deadline
    pub fn pause_for(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        // Round up so a sub-millisecond pause still closes the gate
        let until = self.now_ms().saturating_add(millis.max(1));
        self.paused_until_ms.fetch_max(until, Ordering::SeqCst);
        tracing::warn!(retry_after_ms = millis, "Global rate limit hit, pausing all requests");
    }

    /// Time left until the gate opens
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.paused_until_ms.load(Ordering::SeqCst);
        let now = self.now_ms();
        (until > now).then(|| Duration::from_millis(until - now))
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.remaining().is_some()
    }

    /// Wait until the gate is open
    pub async fn wait(&self) {
        while let Some(remaining) = self.remaining() {
            tokio::time::sleep(remaining).await;
        }
    }
}

impl Default for GlobalGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_by_default() {
        let gate = GlobalGate::new();
        assert!(!gate.is_paused());
        assert_eq!(gate.remaining(), None);
    }

    #[test]
    fn test_longest_pause_wins() {
        let gate = GlobalGate::new();
        gate.pause_for(Duration::from_secs(10));
        gate.pause_for(Duration::from_millis(10));
        assert!(gate.remaining().unwrap() > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_reopened() {
        let gate = GlobalGate::new();
        gate.pause_for(Duration::from_millis(50));

        let started = Instant::now();
        gate.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert!(!gate.is_paused());
    }
}
