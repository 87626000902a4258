//! Test fixtures and payload builders
//!
//! Provides gateway frames and REST bodies shaped like the real API.

use cord_gateway::GatewayMessage;
use cord_http::HttpResponse;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique snowflakes
static COUNTER: AtomicU64 = AtomicU64::new(1_000);

/// Get a unique ID for test data
pub fn unique_id() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

// === Gateway frames ===

pub fn hello(interval_ms: u64) -> GatewayMessage {
    GatewayMessage::hello(interval_ms)
}

pub fn ready(session_id: &str, seq: u64) -> GatewayMessage {
    GatewayMessage::dispatch(
        "READY",
        seq,
        json!({
            "v": 10,
            "user": user_json(1, "cord-bot"),
            "guilds": [],
            "session_id": session_id,
            "resume_gateway_url": "wss://resume.test"
        }),
    )
}

pub fn resumed(seq: u64) -> GatewayMessage {
    GatewayMessage::dispatch("RESUMED", seq, json!({}))
}

pub fn message_create(seq: u64, id: u64, channel_id: u64, content: &str) -> GatewayMessage {
    GatewayMessage::dispatch("MESSAGE_CREATE", seq, message_json(id, channel_id, content))
}

pub fn typing(seq: u64) -> GatewayMessage {
    GatewayMessage::dispatch("TYPING_START", seq, json!({ "channel_id": "1" }))
}

// === Payloads ===

pub fn user_json(id: u64, username: &str) -> Value {
    json!({ "id": id.to_string(), "username": username })
}

pub fn message_json(id: u64, channel_id: u64, content: &str) -> Value {
    json!({
        "id": id.to_string(),
        "channel_id": channel_id.to_string(),
        "author": user_json(7, "author"),
        "content": content,
        "timestamp": "2024-05-01T12:00:00+00:00"
    })
}

// === REST responses ===

pub fn ok(body: &Value) -> HttpResponse {
    HttpResponse::json(200, body)
}

/// Route-scoped 429
pub fn rate_limited(retry_after_secs: f64) -> HttpResponse {
    HttpResponse::json(
        429,
        &json!({ "message": "You are being rate limited.", "retry_after": retry_after_secs, "global": false }),
    )
    .with_header("retry-after", retry_after_secs)
    .with_header("x-ratelimit-scope", "user")
}

/// Process-wide 429
pub fn globally_rate_limited(retry_after_secs: f64) -> HttpResponse {
    HttpResponse::json(
        429,
        &json!({ "message": "You are being rate limited.", "retry_after": retry_after_secs, "global": true }),
    )
    .with_header("x-ratelimit-global", "true")
    .with_header("retry-after", retry_after_secs)
}

/// Success that exhausts a bucket of size one for `reset_after_secs`
pub fn last_in_window(body: &Value, reset_after_secs: f64) -> HttpResponse {
    ok(body)
        .with_header("x-ratelimit-limit", 1)
        .with_header("x-ratelimit-remaining", 0)
        .with_header("x-ratelimit-reset-after", reset_after_secs)
        .with_header("x-ratelimit-bucket", "bucket-one")
}
