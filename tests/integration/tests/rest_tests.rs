//! REST dispatcher scenarios
//!
//! Responses come from a scripted transport; timings are measured on the
//! requests the transport recorded.

use std::time::{Duration, Instant};

use cord_client::ErrorKind;
use cord_core::Snowflake;
use cord_http::{HttpResponse, Route, TransportError};
use integration_tests::{eventually, fixtures, test_config, within, TestClient};
use serde_json::json;

const CHANNEL_ONE: &str = "/channels/1/messages";
const CHANNEL_TWO: &str = "/channels/2/messages";

#[tokio::test]
async fn test_route_429_delays_only_that_route() {
    let t = TestClient::new().unwrap();
    t.http.push(CHANNEL_ONE, fixtures::rate_limited(2.0));
    t.http.push(CHANNEL_ONE, fixtures::ok(&fixtures::message_json(10, 1, "late")));
    t.http.push(CHANNEL_TWO, fixtures::ok(&fixtures::message_json(11, 2, "prompt")));

    let client = t.client.clone();
    let limited = tokio::spawn(async move { client.send_message(Snowflake::new(1), "late").await });
    eventually(|| !t.http.requests_to(CHANNEL_ONE).is_empty())
        .await
        .unwrap();

    let started = Instant::now();
    let prompt = t.client.send_message(Snowflake::new(2), "prompt").await.unwrap();
    assert_eq!(prompt.content, "prompt");
    assert!(started.elapsed() < Duration::from_millis(200));

    let late = within(limited).await.unwrap().unwrap().unwrap();
    assert_eq!(late.id, Snowflake::new(10));

    let attempts = t.http.requests_to(CHANNEL_ONE);
    assert_eq!(attempts.len(), 2);
    let gap = attempts[1].at.duration_since(attempts[0].at);
    assert!(gap >= Duration::from_secs(2), "retried after {gap:?}");
}

#[tokio::test]
async fn test_single_slot_bucket_serves_callers_in_order() {
    let t = TestClient::new().unwrap();
    let path = "/channels/3/messages";
    for i in 0..3 {
        t.http.push(
            path,
            fixtures::last_in_window(&fixtures::message_json(20 + i, 3, "x"), 0.1),
        );
    }

    let mut calls = Vec::new();
    for i in 0..3 {
        let client = t.client.clone();
        calls.push(tokio::spawn(async move {
            client.send_message(Snowflake::new(3), format!("m{i}")).await
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for call in calls {
        within(call).await.unwrap().unwrap().unwrap();
    }

    let requests = t.http.requests_to(path);
    let order: Vec<String> = requests
        .iter()
        .map(|r| r.body.as_ref().unwrap()["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["m0", "m1", "m2"]);
    for pair in requests.windows(2) {
        let gap = pair[1].at.duration_since(pair[0].at);
        assert!(gap >= Duration::from_millis(90), "sent {gap:?} apart");
    }
}

#[tokio::test]
async fn test_exhausted_bucket_blocks_until_reset() {
    let t = TestClient::new().unwrap();
    let path = "/users/5";
    t.http.push(path, fixtures::last_in_window(&fixtures::user_json(5, "one"), 0.2));
    t.http.push(path, fixtures::ok(&fixtures::user_json(5, "two")));

    t.client.http().get_user(Snowflake::new(5)).await.unwrap();
    let route = Route::get("/users/{user_id}").param("user_id", 5);
    let state = t.client.http().limiter().bucket_state(&route).unwrap();
    assert_eq!(state.limit, 1);
    assert_eq!(state.remaining, 0);
    assert!(state.reset_in.is_some());

    let started = Instant::now();
    let user = t.client.http().get_user(Snowflake::new(5)).await.unwrap();
    assert_eq!(user.username, "two");
    assert!(started.elapsed() >= Duration::from_millis(180));
}

#[tokio::test]
async fn test_global_429_pauses_every_route() {
    let t = TestClient::new().unwrap();
    t.http.push(CHANNEL_ONE, fixtures::globally_rate_limited(0.3));
    t.http.push(CHANNEL_ONE, fixtures::ok(&fixtures::message_json(12, 1, "x")));
    t.http.push("/users/9", fixtures::ok(&fixtures::user_json(9, "nine")));

    let client = t.client.clone();
    let limited = tokio::spawn(async move { client.send_message(Snowflake::new(1), "x").await });
    eventually(|| t.client.http().limiter().is_globally_paused())
        .await
        .unwrap();
    let paused_at = t.http.requests_to(CHANNEL_ONE)[0].at;

    t.client.fetch_user(Snowflake::new(9)).await.unwrap();
    let user_request = t.http.requests_to("/users/9")[0].at;
    assert!(user_request.duration_since(paused_at) >= Duration::from_millis(280));

    within(limited).await.unwrap().unwrap().unwrap();
    assert!(!t.client.http().limiter().is_globally_paused());
}

#[tokio::test]
async fn test_rate_limit_retries_are_bounded() {
    let mut config = test_config();
    config.http.max_rate_limit_retries = 1;
    let t = TestClient::with_config(config).unwrap();
    t.http.push(CHANNEL_ONE, fixtures::rate_limited(0.01));
    t.http.push(CHANNEL_ONE, fixtures::rate_limited(0.01));

    let err = t
        .client
        .send_message(Snowflake::new(1), "x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    assert_eq!(err.status(), Some(429));
    assert_eq!(t.http.requests_to(CHANNEL_ONE).len(), 2);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let t = TestClient::new().unwrap();
    t.http.push(CHANNEL_ONE, HttpResponse::json(502, &json!({})));
    t.http.push_result(CHANNEL_ONE, Err(TransportError::Timeout));
    t.http.push(CHANNEL_ONE, fixtures::ok(&fixtures::message_json(13, 1, "ok")));

    let message = t.client.send_message(Snowflake::new(1), "ok").await.unwrap();
    assert_eq!(message.id, Snowflake::new(13));
    assert_eq!(t.http.requests_to(CHANNEL_ONE).len(), 3);
}

#[tokio::test]
async fn test_persistent_server_errors_give_up() {
    let mut config = test_config();
    config.http.max_transient_retries = 2;
    let t = TestClient::with_config(config).unwrap();
    for _ in 0..3 {
        t.http.push(CHANNEL_ONE, HttpResponse::json(500, &json!({})));
    }

    let err = t
        .client
        .send_message(Snowflake::new(1), "x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.is_retryable());
    assert_eq!(t.http.requests_to(CHANNEL_ONE).len(), 3);
}

#[tokio::test]
async fn test_rejection_carries_status_and_api_error() {
    let t = TestClient::new().unwrap();
    t.http.push(
        "/channels/77",
        HttpResponse::json(404, &json!({ "code": 10003, "message": "Unknown Channel" })),
    );

    let err = t.client.fetch_channel(Snowflake::new(77)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestRejected);
    assert_eq!(err.status(), Some(404));
    let body = err.api_error().unwrap();
    assert_eq!(body.code, 10003);
    assert_eq!(body.message, "Unknown Channel");
    assert_eq!(t.http.requests_to("/channels/77").len(), 1);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_calls() {
    let t = TestClient::new().unwrap();
    t.http.set_latency(Duration::from_millis(150));
    t.http.push(CHANNEL_ONE, fixtures::ok(&fixtures::message_json(14, 1, "slow")));

    let client = t.client.clone();
    let in_flight = tokio::spawn(async move { client.send_message(Snowflake::new(1), "slow").await });
    eventually(|| t.client.http().in_flight() == 1).await.unwrap();

    within(t.shutdown()).await.unwrap();
    assert_eq!(in_flight.await.unwrap().unwrap().content, "slow");

    let err = t
        .client
        .send_message(Snowflake::new(1), "too late")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert_eq!(t.http.requests().len(), 1);
}
