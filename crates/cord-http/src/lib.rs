//! # cord-http
//!
//! REST dispatcher: route-keyed rate limiting, retry policy, and cache
//! write-through for successful responses.

pub mod client;
pub mod endpoints;
pub mod ratelimit;
pub mod routing;
pub mod transport;

pub use client::HttpClient;
pub use endpoints::{
    CreateMessage, GatewayBotInfo, GetMessages, MessageReference, SessionStartLimit,
    MAX_MESSAGES_PER_REQUEST,
};
pub use ratelimit::{
    BucketSnapshot, GlobalGate, RateLimitBody, RateLimitHeaders, RateLimitScope, RateLimiter,
    RatePermit,
};
pub use routing::{Method, ResponseKind, Route};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
