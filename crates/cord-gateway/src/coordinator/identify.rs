//! Identify limiter
//!
//! The gateway accepts `max_concurrency` identifies per window across all
//! shards of a bot. A single worker task hands out slots strictly in request
//! order.

use crate::error::GatewayError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Handle for requesting identify slots
#[derive(Debug, Clone)]
pub struct IdentifyLimiter {
    requests: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl IdentifyLimiter {
    /// Spawn the worker; it stops once every handle is dropped
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(interval: Duration, max_concurrency: u32) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, interval, max_concurrency.max(1)));
        Self { requests }
    }

    /// Wait for an identify slot
    ///
    /// Dropping the returned future gives up the place in line.
    pub async fn acquire(&self) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).map_err(|_| GatewayError::Shutdown)?;
        rx.await.map_err(|_| GatewayError::Shutdown)
    }
}

async fn run(
    mut requests: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    interval: Duration,
    max_concurrency: u32,
) {
    let mut window_start: Option<Instant> = None;
    let mut used = 0u32;

    while let Some(waiter) = requests.recv().await {
        if waiter.is_closed() {
            continue;
        }

        let now = Instant::now();
        match window_start {
            Some(start) if now < start + interval => {
                if used >= max_concurrency {
                    tokio::time::sleep_until(start + interval).await;
                    window_start = Some(Instant::now());
                    used = 0;
                }
            }
            _ => {
                window_start = Some(now);
                used = 0;
            }
        }

        // A waiter that gave up while we slept does not use the slot
        if waiter.send(()).is_ok() {
            used += 1;
            tracing::debug!(used, max_concurrency, "Identify slot granted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_identify_is_immediate() {
        let limiter = IdentifyLimiter::new(Duration::from_secs(5), 1);
        let started = std::time::Instant::now();
        limiter.acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_slots_are_spaced_and_fifo() {
        let limiter = IdentifyLimiter::new(Duration::from_millis(100), 1);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let started = std::time::Instant::now();

        let mut tasks = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                order.lock().push((i, started.elapsed()));
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for task in tasks {
            task.await.unwrap();
        }

        let order = order.lock();
        let ids: Vec<_> = order.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(order[1].1 >= Duration::from_millis(95));
        assert!(order[2].1 >= Duration::from_millis(195));
    }

    #[tokio::test]
    async fn test_max_concurrency_shares_a_window() {
        let limiter = IdentifyLimiter::new(Duration::from_millis(200), 2);
        let started = std::time::Instant::now();

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        limiter.acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_frees_its_slot() {
        let limiter = IdentifyLimiter::new(Duration::from_millis(100), 1);
        limiter.acquire().await.unwrap();

        // Gives up while the window is closed
        let abandoned = tokio::time::timeout(Duration::from_millis(10), limiter.acquire()).await;
        assert!(abandoned.is_err());

        let started = std::time::Instant::now();
        limiter.acquire().await.unwrap();
        // Next window, not the one after it
        assert!(started.elapsed() < Duration::from_millis(150));
    }
}
