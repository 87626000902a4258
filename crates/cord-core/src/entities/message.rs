//! Message entity - a message posted in a channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::User;
use crate::value_objects::Snowflake;

/// Message entity
///
/// The author is referenced by ID; resolve it through the user cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author_id: Snowflake,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub mention_ids: Vec<Snowflake>,
}

impl Message {
    /// Create a new Message timestamped from its ID
    #[must_use]
    pub fn new(
        id: Snowflake,
        channel_id: Snowflake,
        author_id: Snowflake,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            channel_id,
            guild_id: None,
            author_id,
            content: content.into(),
            timestamp: id.created_at(),
            edited_timestamp: None,
            pinned: false,
            tts: false,
            mention_ids: Vec::new(),
        }
    }

    /// Check if the message has been edited
    #[inline]
    pub fn is_edited(&self) -> bool {
        self.edited_timestamp.is_some()
    }

    /// Apply a partial MESSAGE_UPDATE payload
    ///
    /// Only fields present in `data` are touched. Returns true if anything changed.
    pub fn apply_update(&mut self, data: &Value) -> bool {
        let before = self.clone();

        if let Some(content) = data.get("content").and_then(Value::as_str) {
            content.clone_into(&mut self.content);
        }
        if let Some(edited) = data.get("edited_timestamp") {
            if let Ok(edited) = serde_json::from_value(edited.clone()) {
                self.edited_timestamp = edited;
            }
        }
        if let Some(pinned) = data.get("pinned").and_then(Value::as_bool) {
            self.pinned = pinned;
        }
        if let Some(tts) = data.get("tts").and_then(Value::as_bool) {
            self.tts = tts;
        }
        if let Some(mentions) = data.get("mentions").and_then(Value::as_array) {
            self.mention_ids = mentions
                .iter()
                .filter_map(|m| m.get("id"))
                .filter_map(|id| serde_json::from_value(id.clone()).ok())
                .collect();
        }

        *self != before
    }
}

/// Message as sent on the wire, with author and mentions embedded
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
}

impl MessagePayload {
    /// Split into the message and every user it references (author first)
    #[must_use]
    pub fn into_parts(self) -> (Message, Vec<User>) {
        let message = Message {
            id: self.id,
            channel_id: self.channel_id,
            guild_id: self.guild_id,
            author_id: self.author.id,
            content: self.content,
            timestamp: self.timestamp,
            edited_timestamp: self.edited_timestamp,
            pinned: self.pinned,
            tts: self.tts,
            mention_ids: self.mentions.iter().map(|u| u.id).collect(),
        };

        let mut users = Vec::with_capacity(1 + self.mentions.len());
        users.push(self.author);
        users.extend(self.mentions);
        (message, users)
    }
}
