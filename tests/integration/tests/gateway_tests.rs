//! Gateway session scenarios
//!
//! Every test drives a full client through the in-memory gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cord_cache::EntityKey;
use cord_client::{ErrorKind, EventData, EventKind, SessionState};
use cord_core::Snowflake;
use cord_gateway::{GatewayMessage, OpCode};
use integration_tests::{eventually, fixtures, test_config, within, TestClient};
use parking_lot::Mutex;
use serde_json::json;

/// Collect the ids of every MESSAGE_CREATE seen by handlers
fn collect_messages(t: &TestClient) -> Arc<Mutex<Vec<u64>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    t.client.on(EventKind::MessageCreate, move |event| {
        let sink = sink.clone();
        async move {
            if let EventData::MessageCreate(message) = &event.data {
                sink.lock().push(message.id.get());
            }
            Ok::<(), anyhow::Error>(())
        }
    });
    seen
}

#[tokio::test]
async fn test_created_entity_is_cached_unchanged() {
    let t = TestClient::new().unwrap();
    let server = t.connect("session-z").await.unwrap();
    assert!(t.client.cache().channel(Snowflake::new(42)).is_none());

    server.send(GatewayMessage::dispatch(
        "CHANNEL_CREATE",
        2,
        json!({
            "id": "42",
            "type": 0,
            "guild_id": "9",
            "name": "general",
            "topic": "hi",
            "position": 3
        }),
    ));

    eventually(|| t.client.cache().get(&EntityKey::Channel(Snowflake::new(42))).is_some())
        .await
        .unwrap();
    let channel = t.client.cache().channel(Snowflake::new(42)).unwrap();
    assert_eq!(channel.guild_id, Some(Snowflake::new(9)));
    assert_eq!(channel.name.as_deref(), Some("general"));
    assert_eq!(channel.topic.as_deref(), Some("hi"));
    assert_eq!(channel.position, Some(3));

    t.shutdown().await;
}

#[tokio::test]
async fn test_delete_of_uncached_message_leaves_cache_untouched() {
    let t = TestClient::new().unwrap();
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = deleted.clone();
    t.client.on(EventKind::MessageDelete, move |event| {
        let sink = sink.clone();
        async move {
            if let EventData::MessageDelete { id, cached, .. } = &event.data {
                sink.lock().push((id.get(), cached.is_some()));
            }
            Ok::<(), anyhow::Error>(())
        }
    });

    let server = t.connect("session-a").await.unwrap();
    server.send(fixtures::message_create(2, 100, 5, "kept"));
    server.send(GatewayMessage::dispatch(
        "MESSAGE_DELETE",
        3,
        json!({ "id": "42", "channel_id": "5" }),
    ));

    eventually(|| !deleted.lock().is_empty()).await.unwrap();
    assert_eq!(*deleted.lock(), vec![(42, false)]);
    assert!(t.client.cache().message(Snowflake::new(42)).is_none());
    assert_eq!(
        t.client.cache().message(Snowflake::new(100)).unwrap().content,
        "kept"
    );

    t.shutdown().await;
}

#[tokio::test]
async fn test_resumable_invalid_session_resumes_without_loss_or_duplicates() {
    let t = TestClient::new().unwrap();
    let seen = collect_messages(&t);

    let mut server = t.connect("session-b").await.unwrap();
    server.send(fixtures::message_create(2, 100, 5, "first"));
    eventually(|| seen.lock().len() == 1).await.unwrap();

    server.send(GatewayMessage::invalid_session(true));
    assert_eq!(server.closed().await, Some(4000));

    let mut server = t.gateway.accept().await;
    assert!(server.url.starts_with("wss://resume.test"));
    server.send(fixtures::hello(45_000));
    let resume = server.expect_op(OpCode::Resume).await.as_resume().unwrap();
    assert_eq!(resume.session_id, "session-b");
    assert_eq!(resume.seq, 2);

    // Replay overlaps what the client already saw
    server.send(fixtures::message_create(2, 100, 5, "first"));
    server.send(fixtures::message_create(3, 101, 5, "second"));
    server.send(fixtures::resumed(4));

    eventually(|| t.client.shard_status(0).unwrap().last_sequence == Some(4))
        .await
        .unwrap();
    eventually(|| seen.lock().len() >= 2).await.unwrap();
    assert_eq!(*seen.lock(), vec![100, 101]);

    t.shutdown().await;
}

#[tokio::test]
async fn test_zombie_connection_is_resumed() {
    let t = TestClient::new().unwrap();
    t.client.start().await.unwrap();

    let mut server = t.gateway.accept().await;
    server.send(fixtures::hello(30));
    server.expect_op(OpCode::Identify).await;
    server.send(fixtures::ready("session-c", 1));
    server.send(fixtures::typing(2));

    // Heartbeats go unacknowledged until the client gives up on the socket
    assert_eq!(within(server.closed()).await.unwrap(), Some(4000));

    let mut server = t.gateway.accept().await;
    server.send(fixtures::hello(45_000));
    let resume = server.expect_op(OpCode::Resume).await.as_resume().unwrap();
    assert_eq!(resume.session_id, "session-c");
    assert_eq!(resume.seq, 2);

    t.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_acks_keep_connection_alive() {
    let t = TestClient::new().unwrap();
    t.client.start().await.unwrap();

    let mut server = t.gateway.accept().await;
    server.send(fixtures::hello(40));
    server.expect_op(OpCode::Identify).await;
    server.send(fixtures::ready("session-d", 1));

    for _ in 0..6 {
        server.expect_op(OpCode::Heartbeat).await;
        server.send(GatewayMessage::heartbeat_ack());
    }

    eventually(|| t.client.shard_status(0).unwrap().latency.is_some())
        .await
        .unwrap();
    assert_eq!(t.gateway.attempts(), 1);

    t.shutdown().await;
}

#[tokio::test]
async fn test_authentication_failure_is_reported_by_wait() {
    let t = TestClient::new().unwrap();
    t.client.start().await.unwrap();

    let mut server = t.gateway.accept().await;
    server.send(fixtures::hello(45_000));
    server.expect_op(OpCode::Identify).await;
    server.close(4004, "Authentication failed");

    let err = within(t.client.wait()).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    assert!(err.is_fatal());
    assert_eq!(t.gateway.attempts(), 1);

    t.shutdown().await;
}

#[tokio::test]
async fn test_identifies_are_spaced_across_shards() {
    let mut config = test_config();
    config.client.shard_count = Some(3);
    config.shards.identify_interval_ms = 100;
    let t = TestClient::with_config(config).unwrap();
    t.client.start().await.unwrap();

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let mut server = t.gateway.accept().await;
        server.send(fixtures::hello(45_000));
        waiters.push(tokio::spawn(async move {
            let identify = server.expect_op(OpCode::Identify).await;
            let shard = identify.as_identify().unwrap().shard;
            (Instant::now(), shard, server)
        }));
    }

    let mut identified = Vec::new();
    for waiter in waiters {
        identified.push(waiter.await.unwrap());
    }
    identified.sort_by_key(|(at, _, _)| *at);

    let mut shards: Vec<u32> = identified.iter().map(|(_, shard, _)| shard[0]).collect();
    shards.sort_unstable();
    assert_eq!(shards, vec![0, 1, 2]);
    assert!(identified.iter().all(|(_, shard, _)| shard[1] == 3));

    for pair in identified.windows(2) {
        let gap = pair[1].0.duration_since(pair[0].0);
        assert!(gap >= Duration::from_millis(90), "identifies {gap:?} apart");
    }

    t.shutdown().await;
}

#[tokio::test]
async fn test_events_of_one_shard_are_handled_in_order() {
    let t = TestClient::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    t.client.on(EventKind::MessageCreate, move |event| {
        let sink = sink.clone();
        async move {
            if let EventData::MessageCreate(message) = &event.data {
                // Early messages take longer so reordering would show
                let id = message.id.get();
                tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(id - 100))).await;
                sink.lock().push(id);
            }
            Ok::<(), anyhow::Error>(())
        }
    });

    let server = t.connect("session-e").await.unwrap();
    for i in 0..20u64 {
        server.send(fixtures::message_create(i + 2, 100 + i, 5, "hi"));
    }

    eventually(|| seen.lock().len() == 20).await.unwrap();
    let expected: Vec<u64> = (100..120).collect();
    assert_eq!(*seen.lock(), expected);

    t.shutdown().await;
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_session() {
    let t = TestClient::new().unwrap();
    t.client.on(EventKind::MessageCreate, |event| async move {
        if let EventData::MessageCreate(message) = &event.data {
            if message.content == "boom" {
                panic!("handler exploded");
            }
        }
        Ok::<(), anyhow::Error>(())
    });
    let seen = collect_messages(&t);

    let server = t.connect("session-f").await.unwrap();
    server.send(fixtures::message_create(2, 100, 5, "boom"));
    server.send(fixtures::message_create(3, 101, 5, "fine"));

    eventually(|| seen.lock().len() == 2).await.unwrap();
    assert_eq!(*seen.lock(), vec![100, 101]);

    let status = t.client.shard_status(0).unwrap();
    assert_eq!(status.state, SessionState::Connected);
    assert_eq!(status.last_sequence, Some(3));
    assert_eq!(status.session_id.as_deref(), Some("session-f"));
    assert_eq!(t.gateway.attempts(), 1);

    t.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_gateway_normally() {
    let t = TestClient::new().unwrap();
    let mut server = t.connect("session-g").await.unwrap();

    t.shutdown().await;
    assert_eq!(server.closed().await, Some(1000));
    assert!(within(t.client.wait()).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unreachable_gateway_retries_until_connected() {
    let t = TestClient::new().unwrap();
    t.gateway.refuse(2);
    t.client.start().await.unwrap();

    let mut server = t.gateway.accept().await;
    server.send(fixtures::hello(45_000));
    server.expect_op(OpCode::Identify).await;
    assert_eq!(t.gateway.attempts(), 3);

    t.shutdown().await;
}
