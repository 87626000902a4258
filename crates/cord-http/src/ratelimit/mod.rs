//! Rate limiting
//!
//! Per-route buckets learned from response headers, a global pause gate, and
//! a proactive requests-per-second cap.

mod bucket;
mod global;
mod headers;
mod limiter;

pub use bucket::BucketSnapshot;
pub use global::GlobalGate;
pub use headers::{RateLimitBody, RateLimitHeaders, RateLimitScope};
pub use limiter::{RateLimiter, RatePermit};
