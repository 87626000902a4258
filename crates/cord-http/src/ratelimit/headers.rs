//! Rate limit header parsing
//!
//! Parses the `X-RateLimit-*`, `Retry-After` and `Date` headers the API sends
//! with every response, plus the JSON body of a 429.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Scope of a 429
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Per-route limit for this client
    User,
    /// Process-wide limit for this client
    Global,
    /// Per-resource limit shared with other clients; does not count against us
    Shared,
}

impl RateLimitScope {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "global" => Some(Self::Global),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Parsed rate limit information from response headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Requests allowed per window
    pub limit: Option<u32>,
    /// Requests left in the current window
    pub remaining: Option<u32>,
    /// Unix time (seconds, fractional) at which the window resets
    pub reset: Option<f64>,
    /// Time until the window resets, computed by the server
    pub reset_after: Option<Duration>,
    /// Server-assigned bucket hash
    pub bucket: Option<String>,
    /// The 429 is process-wide
    pub global: bool,
    pub scope: Option<RateLimitScope>,
    pub retry_after: Option<Duration>,
    /// Server clock at response time
    pub date: Option<DateTime<Utc>>,
}

/// JSON body of a 429 response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub code: Option<u32>,
}

impl RateLimitHeaders {
    /// Parse from a header map with lowercase names
    #[must_use]
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        let get = |name: &str| headers.get(name).map(|v| v.trim());

        Self {
            limit: get("x-ratelimit-limit").and_then(|v| v.parse().ok()),
            remaining: get("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset: get("x-ratelimit-reset").and_then(|v| v.parse().ok()),
            reset_after: get("x-ratelimit-reset-after").and_then(parse_seconds),
            bucket: get("x-ratelimit-bucket")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            global: get("x-ratelimit-global").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: get("x-ratelimit-scope").and_then(RateLimitScope::parse),
            retry_after: get("retry-after").and_then(parse_seconds),
            date: get("date")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }

    /// Whether the response carried any bucket information at all
    #[must_use]
    pub fn has_bucket_info(&self) -> bool {
        self.limit.is_some()
            || self.remaining.is_some()
            || self.reset.is_some()
            || self.reset_after.is_some()
    }

    /// Whether a 429 applies to every route
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global || self.scope == Some(RateLimitScope::Global)
    }

    /// Fold in the body of a 429, which is authoritative for retry_after and global
    pub fn merge_body(&mut self, body: &RateLimitBody) {
        if body.retry_after > 0.0 {
            if let Ok(retry_after) = Duration::try_from_secs_f64(body.retry_after) {
                self.retry_after = Some(retry_after);
            }
        }
        self.global |= body.global;
    }

    /// Time until the bucket resets, measured on the server's clock where possible
    ///
    /// Preference: `Reset-After`; `Reset` relative to `Date`; `Retry-After`;
    /// `Reset` relative to the local clock.
    #[must_use]
    pub fn reset_in(&self, local_now: DateTime<Utc>) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(after);
        }
        if let (Some(reset), Some(server_now)) = (self.reset, self.date) {
            return Some(seconds_until(reset, server_now));
        }
        if let Some(retry) = self.retry_after {
            return Some(retry);
        }
        self.reset.map(|reset| seconds_until(reset, local_now))
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn seconds_until(reset: f64, now: DateTime<Utc>) -> Duration {
    let now = now.timestamp_millis() as f64 / 1000.0;
    let delta = reset - now;
    Duration::try_from_secs_f64(delta).unwrap_or(Duration::ZERO)
}
