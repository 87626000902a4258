//! Route-aware rate limiter
//!
//! Buckets are keyed by the server-assigned bucket hash once it is known, and
//! by the route signature until then, always combined with the major
//! parameters of the route.

use super::bucket::{Bucket, BucketSnapshot};
use super::global::GlobalGate;
use super::headers::RateLimitHeaders;
use crate::routing::Route;
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Permission to send one request on a route
///
/// Dropping a permit without passing it to [`RateLimiter::complete`] returns
/// its token to the bucket.
#[derive(Debug)]
#[must_use = "dropping a permit releases its token"]
pub struct RatePermit {
    bucket: Arc<Bucket>,
    settled: bool,
}

impl RatePermit {
    /// Key of the bucket this permit was drawn from
    pub fn bucket_key(&self) -> &str {
        self.bucket.key()
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if !self.settled {
            self.bucket.release();
        }
    }
}

/// Shared per-route and global rate limiter
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Bucket>>,
    /// Route signature -> server bucket hash
    hashes: DashMap<String, String>,
    global: GlobalGate,
    /// Proactive requests-per-second cap, independent of any server signal
    throttle: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("buckets", &self.buckets.len())
            .field("global_paused", &self.global.is_paused())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter capped at `requests_per_second` across all routes
    #[must_use]
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            hashes: DashMap::new(),
            global: GlobalGate::new(),
            throttle: NonZeroU32::new(requests_per_second)
                .map(|rps| Governor::direct(Quota::per_second(rps))),
        }
    }

    /// Limiter without a proactive cap
    #[must_use]
    pub fn unthrottled() -> Self {
        Self::new(0)
    }

    fn key_for(&self, route: &Route) -> String {
        let signature = route.signature();
        let id = self
            .hashes
            .get(&signature)
            .map_or(signature, |hash| hash.value().clone());
        format!("{id}:{}", route.major_parameters())
    }

    fn bucket(&self, route: &Route) -> Arc<Bucket> {
        let key = self.key_for(route);
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Bucket::new(key)))
            .value()
            .clone()
    }

    /// Wait until a request on `route` may be sent
    ///
    /// Callers on the same bucket are served in arrival order. A permit is
    /// never granted while the bucket is empty and its reset lies ahead, nor
    /// while the global gate is closed.
    pub async fn acquire(&self, route: &Route) -> RatePermit {
        let bucket = loop {
            let bucket = self.bucket(route);
            let _turn = bucket.enter().await;
            if bucket.take(&self.global).await {
                break Arc::clone(&bucket);
            }
            tracing::trace!(route = %route, bucket = %bucket.key(), "Bucket retired, re-routing");
        };
        if let Some(throttle) = &self.throttle {
            throttle.until_ready().await;
        }
        tracing::trace!(route = %route, bucket = %bucket.key(), "Rate limit permit granted");
        RatePermit {
            bucket,
            settled: false,
        }
    }

    /// Settle a permit with the response it produced
    pub fn complete(
        &self,
        mut permit: RatePermit,
        route: &Route,
        status: u16,
        headers: &RateLimitHeaders,
    ) {
        permit.settled = true;
        permit.bucket.finish();
        self.apply(&permit.bucket, route, status, headers);
    }

    /// Fold a response into the limiter state without a permit
    pub fn update_from_response(&self, route: &Route, status: u16, headers: &RateLimitHeaders) {
        let bucket = self.bucket(route);
        self.apply(&bucket, route, status, headers);
    }

    fn apply(&self, bucket: &Arc<Bucket>, route: &Route, status: u16, headers: &RateLimitHeaders) {
        if status == 429 && headers.is_global() {
            self.global
                .pause_for(headers.retry_after.unwrap_or(Duration::from_secs(1)));
        }
        match &headers.bucket {
            Some(hash) => {
                let shared = self.learn_hash(route, hash, bucket);
                shared.apply(status, headers);
                if !Arc::ptr_eq(&shared, bucket) {
                    self.retire(bucket);
                }
            }
            None => bucket.apply(status, headers),
        }
    }

    /// Remember the server bucket for a route and return the bucket now serving it
    ///
    /// The first route to report a hash moves its bucket under the hashed key;
    /// later routes with the same hash join that bucket.
    fn learn_hash(&self, route: &Route, hash: &str, bucket: &Arc<Bucket>) -> Arc<Bucket> {
        let signature = route.signature();
        let key = format!("{hash}:{}", route.major_parameters());
        let shared = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| Arc::clone(bucket))
            .value()
            .clone();

        let known = self
            .hashes
            .get(&signature)
            .is_some_and(|known| known.value() == hash);
        if !known {
            self.hashes.insert(signature.clone(), hash.to_string());
            tracing::debug!(route = %signature, bucket = %key, "Learned rate limit bucket");
        }
        shared
    }

    /// Drop a bucket whose route now maps to a shared one
    ///
    /// Requests still queued on it wake up and re-route.
    fn retire(&self, bucket: &Arc<Bucket>) {
        self.buckets
            .remove_if(bucket.key(), |_, current| Arc::ptr_eq(current, bucket));
        bucket.retire();
        tracing::debug!(bucket = %bucket.key(), "Retired rate limit bucket");
    }

    /// Whether a global 429 is currently pausing all requests
    #[must_use]
    pub fn is_globally_paused(&self) -> bool {
        self.global.is_paused()
    }

    /// Close the global gate manually
    pub fn pause_globally(&self, duration: Duration) {
        self.global.pause_for(duration);
    }

    /// State of the bucket `route` currently maps to, if one exists
    #[must_use]
    pub fn bucket_state(&self, route: &Route) -> Option<BucketSnapshot> {
        self.buckets
            .get(&self.key_for(route))
            .map(|bucket| bucket.snapshot())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unthrottled()
    }
}
