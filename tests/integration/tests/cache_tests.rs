//! Cache folding across event streams
//!
//! The cache is a fold of the dispatch stream: the latest event for a key
//! wins, and a duplicated event changes nothing.

use cord_cache::{EntityKind, ObjectCache};
use cord_core::Snowflake;
use cord_gateway::Event;
use integration_tests::fixtures;
use serde_json::{json, Value};

fn guild_create(id: u64, name: &str) -> Value {
    json!({
        "id": id.to_string(),
        "name": name,
        "owner_id": "7",
        "channels": [
            { "id": (id + 1).to_string(), "type": 0, "name": "general" },
            { "id": (id + 2).to_string(), "type": 2, "name": "voice" }
        ],
        "roles": [{ "id": id.to_string(), "name": "@everyone" }],
        "members": [{
            "user": fixtures::user_json(7, "owner"),
            "roles": [],
            "joined_at": "2024-01-01T00:00:00+00:00",
            "deaf": true
        }]
    })
}

fn stream() -> Vec<(&'static str, Value)> {
    vec![
        ("GUILD_CREATE", guild_create(100, "first")),
        ("GUILD_CREATE", guild_create(200, "second")),
        ("GUILD_UPDATE", json!({ "id": "100", "name": "renamed" })),
        ("CHANNEL_UPDATE", json!({ "id": "101", "type": 0, "guild_id": "100", "name": "chat" })),
        ("MESSAGE_CREATE", fixtures::message_json(500, 101, "hello")),
        ("MESSAGE_CREATE", fixtures::message_json(501, 101, "bye")),
        (
            "MESSAGE_UPDATE",
            json!({
                "id": "500",
                "channel_id": "101",
                "content": "hello, edited",
                "edited_timestamp": "2024-05-01T12:01:00+00:00"
            }),
        ),
        ("MESSAGE_DELETE", json!({ "id": "501", "channel_id": "101" })),
        (
            "GUILD_MEMBER_UPDATE",
            json!({
                "guild_id": "100",
                "user": fixtures::user_json(7, "owner2"),
                "nick": "boss",
                "roles": []
            }),
        ),
        ("GUILD_DELETE", json!({ "id": "200" })),
        ("USER_UPDATE", fixtures::user_json(1, "cord-bot")),
    ]
}

fn fold(events: &[(&'static str, Value)], times: usize) -> ObjectCache {
    let cache = ObjectCache::new(100);
    for (seq, (name, data)) in events.iter().enumerate() {
        for _ in 0..times {
            Event::decode(0, Some(seq as u64 + 1), name, data.clone(), &cache).unwrap();
        }
    }
    cache
}

#[test]
fn test_latest_event_wins() {
    let cache = fold(&stream(), 1);

    assert_eq!(cache.guild(Snowflake::new(100)).unwrap().name, "renamed");
    assert_eq!(cache.channel(Snowflake::new(101)).unwrap().name.as_deref(), Some("chat"));
    assert_eq!(
        cache.message(Snowflake::new(500)).unwrap().content,
        "hello, edited"
    );
    assert!(cache.message(Snowflake::new(501)).is_none());

    let member = cache.member(Snowflake::new(100), Snowflake::new(7)).unwrap();
    assert_eq!(member.nick.as_deref(), Some("boss"));
    // Updates do not carry voice state; the GUILD_CREATE value survives
    assert!(member.deaf);
    assert_eq!(cache.user(Snowflake::new(7)).unwrap().username, "owner2");
}

#[test]
fn test_deleted_guild_takes_its_children() {
    let cache = fold(&stream(), 1);

    assert!(cache.guild(Snowflake::new(200)).is_none());
    assert!(cache.channel(Snowflake::new(201)).is_none());
    assert!(cache.channels_of_guild(Snowflake::new(200)).is_empty());
    assert!(cache.member(Snowflake::new(200), Snowflake::new(7)).is_none());
    assert_eq!(cache.channels_of_guild(Snowflake::new(100)).len(), 2);
}

#[test]
fn test_duplicated_events_are_no_ops() {
    let once = fold(&stream(), 1);
    let twice = fold(&stream(), 2);

    for kind in EntityKind::ALL {
        assert_eq!(once.snapshot(kind), twice.snapshot(kind), "{kind:?} differs");
    }
}

#[test]
fn test_message_for_unknown_channel_is_still_cached() {
    let cache = ObjectCache::new(10);
    Event::decode(
        0,
        Some(1),
        "MESSAGE_CREATE",
        fixtures::message_json(900, 999, "orphan"),
        &cache,
    )
    .unwrap();

    let message = cache.message(Snowflake::new(900)).unwrap();
    assert_eq!(message.guild_id, None);
    assert_eq!(cache.author_of(Snowflake::new(900)).unwrap().username, "author");
}
