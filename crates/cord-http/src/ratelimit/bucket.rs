//! Per-route token bucket
//!
//! Waiters are served strictly in arrival order: the `queue` mutex is fair,
//! and only the holder may inspect or consume the bucket.

use super::global::GlobalGate;
use super::headers::RateLimitHeaders;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, Notify};

/// Point-in-time view of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the window resets, if known
    pub reset_in: Option<Duration>,
    /// Permits handed out whose response has not been seen yet
    pub in_flight: u32,
}

#[derive(Debug)]
struct BucketState {
    limit: u32,
    remaining: u32,
    reset_at: Option<Instant>,
    in_flight: u32,
}

enum Wait {
    Until(Instant),
    Settle,
}

#[derive(Debug)]
pub(crate) struct Bucket {
    key: String,
    queue: AsyncMutex<()>,
    state: Mutex<BucketState>,
    settled: Notify,
    /// Set once the route moved to a shared bucket; waiters must re-route
    retired: AtomicBool,
}

impl Bucket {
    /// New buckets allow one request until the server tells us the real limit
    pub(crate) fn new(key: String) -> Self {
        Self {
            key,
            queue: AsyncMutex::new(()),
            state: Mutex::new(BucketState {
                limit: 1,
                remaining: 1,
                reset_at: None,
                in_flight: 0,
            }),
            settled: Notify::new(),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Join the FIFO line for this bucket
    pub(crate) async fn enter(&self) -> MutexGuard<'_, ()> {
        self.queue.lock().await
    }

    /// Consume one token, waiting for a reset or an in-flight response as needed.
    ///
    /// Must be called while holding the guard from [`Bucket::enter`]. Returns
    /// `false` without a token if the bucket was retired meanwhile.
    pub(crate) async fn take(&self, global: &GlobalGate) -> bool {
        loop {
            global.wait().await;

            // Registered before inspecting state so a settle in between is not missed
            let settled = self.settled.notified();
            if self.is_retired() {
                return false;
            }

            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if state.reset_at.is_some_and(|reset| now >= reset) {
                    state.remaining = state.limit;
                    state.reset_at = None;
                }
                // Nothing pending can tell us when the window resets
                if state.remaining == 0 && state.reset_at.is_none() && state.in_flight == 0 {
                    state.remaining = state.limit.max(1);
                }

                if state.remaining > 0 {
                    state.remaining -= 1;
                    state.in_flight += 1;
                    return true;
                }

                match state.reset_at {
                    Some(reset) => Wait::Until(reset),
                    None => Wait::Settle,
                }
            };

            match wait {
                Wait::Until(reset) => {
                    tracing::debug!(
                        bucket = %self.key,
                        wait_ms = reset.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Bucket exhausted, waiting for reset"
                    );
                    // A settle may retire the bucket or move the reset
                    tokio::select! {
                        () = tokio::time::sleep_until(reset.into()) => {}
                        () = settled => {}
                    }
                }
                Wait::Settle => settled.await,
            }
        }
    }

    /// Stop serving this bucket and wake everyone waiting on it
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.settled.notify_waiters();
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Mark one permit as answered
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Permit dropped without a response: hand the token back
    pub(crate) fn release(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.remaining = (state.remaining + 1).min(state.limit.max(1));
        }
        self.settled.notify_waiters();
    }

    /// Fold a response into the bucket state
    pub(crate) fn apply(&self, status: u16, headers: &RateLimitHeaders) {
        let now = Instant::now();
        let reset_in = headers.reset_in(Utc::now());
        {
            let mut state = self.state.lock();

            if status == 429 && !headers.is_global() {
                state.remaining = 0;
                let wait = headers.retry_after.or(reset_in).unwrap_or(Duration::from_secs(1));
                state.reset_at = Some(deadline(now, wait));
            } else if headers.has_bucket_info() && status != 429 {
                if let Some(limit) = headers.limit {
                    state.limit = limit.max(1);
                }
                if let Some(remaining) = headers.remaining {
                    // The server has not seen requests still in flight
                    state.remaining = remaining.saturating_sub(state.in_flight);
                }
                if let Some(reset_in) = reset_in {
                    state.reset_at = Some(deadline(now, reset_in));
                }
            } else {
                state.remaining = (state.remaining + 1).min(state.limit.max(1));
            }
        }
        self.settled.notify_waiters();
    }

    pub(crate) fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        let now = Instant::now();
        BucketSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset_in: state.reset_at.map(|reset| reset.saturating_duration_since(now)),
            in_flight: state.in_flight,
        }
    }
}

/// Longest window a bucket will honour from a single response
const MAX_RESET: Duration = Duration::from_secs(24 * 60 * 60);

fn deadline(now: Instant, after: Duration) -> Instant {
    now + after.min(MAX_RESET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn headers(limit: u32, remaining: u32, reset_after_ms: u64) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: Some(limit),
            remaining: Some(remaining),
            reset_after: Some(Duration::from_millis(reset_after_ms)),
            ..RateLimitHeaders::default()
        }
    }

    async fn take(bucket: &Bucket, gate: &GlobalGate) {
        let _turn = bucket.enter().await;
        bucket.take(gate).await;
    }

    #[tokio::test]
    async fn test_new_bucket_allows_one_request() {
        let bucket = Bucket::new("test".into());
        let gate = GlobalGate::new();
        take(&bucket, &gate).await;

        let snap = bucket.snapshot();
        assert_eq!(snap.remaining, 0);
        assert_eq!(snap.in_flight, 1);
    }

    #[tokio::test]
    async fn test_headers_update_state() {
        let bucket = Bucket::new("test".into());
        let gate = GlobalGate::new();
        take(&bucket, &gate).await;
        bucket.finish();
        bucket.apply(200, &headers(5, 4, 1_000));

        let snap = bucket.snapshot();
        assert_eq!(snap.limit, 5);
        assert_eq!(snap.remaining, 4);
        assert!(snap.reset_in.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_bucket_waits_for_reset() {
        let bucket = Bucket::new("test".into());
        let gate = GlobalGate::new();
        take(&bucket, &gate).await;
        bucket.finish();
        bucket.apply(200, &headers(1, 0, 150));

        let started = Instant::now();
        take(&bucket, &gate).await;
        assert!(started.elapsed() >= Duration::from_millis(140));
    }

    #[tokio::test]
    async fn test_waits_for_in_flight_response() {
        let bucket = Arc::new(Bucket::new("test".into()));
        let gate = Arc::new(GlobalGate::new());
        take(&bucket, &gate).await;

        let waiter = {
            let bucket = Arc::clone(&bucket);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { take(&bucket, &gate).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        // Response without bucket headers returns the token
        bucket.finish();
        bucket.apply(200, &RateLimitHeaders::default());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_retire_wakes_waiters_without_token() {
        let bucket = Arc::new(Bucket::new("test".into()));
        let gate = Arc::new(GlobalGate::new());
        take(&bucket, &gate).await;

        let waiter = {
            let bucket = Arc::clone(&bucket);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _turn = bucket.enter().await;
                bucket.take(&gate).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        bucket.finish();
        bucket.retire();
        let granted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!granted);
        assert_eq!(bucket.snapshot().in_flight, 0);
    }

    #[tokio::test]
    async fn test_release_returns_token() {
        let bucket = Bucket::new("test".into());
        let gate = GlobalGate::new();
        take(&bucket, &gate).await;
        bucket.release();

        let snap = bucket.snapshot();
        assert_eq!(snap.remaining, 1);
        assert_eq!(snap.in_flight, 0);
    }

    #[test]
    fn test_route_429_empties_bucket() {
        let bucket = Bucket::new("test".into());
        bucket.apply(
            429,
            &RateLimitHeaders {
                retry_after: Some(Duration::from_secs(2)),
                ..RateLimitHeaders::default()
            },
        );

        let snap = bucket.snapshot();
        assert_eq!(snap.remaining, 0);
        assert!(snap.reset_in.unwrap() > Duration::from_millis(1_900));
    }

    #[test]
    fn test_unbounded_retry_after_is_capped() {
        let bucket = Bucket::new("test".into());
        bucket.apply(
            429,
            &RateLimitHeaders {
                retry_after: Some(Duration::MAX),
                ..RateLimitHeaders::default()
            },
        );

        let snap = bucket.snapshot();
        assert_eq!(snap.remaining, 0);
        assert!(snap.reset_in.unwrap() <= MAX_RESET);
    }
}
