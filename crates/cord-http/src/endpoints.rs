//! Typed REST endpoints
//!
//! Thin wrappers that build a [`Route`], call it, and decode the result. Cache
//! updates happen inside [`HttpClient::call`].

use crate::client::HttpClient;
use crate::routing::{ResponseKind, Route};
use cord_common::ClientResult;
use cord_core::{Channel, Guild, GuildPayload, Member, Message, MessagePayload, Role, Snowflake, User};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Most messages a single history request may return
pub const MAX_MESSAGES_PER_REQUEST: u8 = 100;

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotInfo {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    /// Identifies allowed per 5 second window
    pub max_concurrency: u32,
}

/// Body of a message create request
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateMessage {
    pub content: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MessageReference {
    pub message_id: Snowflake,
}

impl CreateMessage {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Send as a reply to `message_id`
    #[must_use]
    pub fn reply_to(mut self, message_id: Snowflake) -> Self {
        self.message_reference = Some(MessageReference { message_id });
        self
    }

    #[must_use]
    pub fn tts(mut self, tts: bool) -> Self {
        self.tts = tts;
        self
    }
}

/// Cursor for a single page of channel history
#[derive(Debug, Clone, Copy, Default)]
pub struct GetMessages {
    pub limit: Option<u8>,
    pub before: Option<Snowflake>,
    pub after: Option<Snowflake>,
}

impl HttpClient {
    pub async fn get_user(&self, user_id: Snowflake) -> ClientResult<User> {
        let route = Route::get("/users/{user_id}")
            .param("user_id", user_id)
            .returns(ResponseKind::User);
        self.call_as(&route, None).await
    }

    /// The bot's own user
    pub async fn current_user(&self) -> ClientResult<User> {
        let route = Route::get("/users/@me").returns(ResponseKind::User);
        self.call_as(&route, None).await
    }

    pub async fn get_channel(&self, channel_id: Snowflake) -> ClientResult<Channel> {
        let route = Route::get("/channels/{channel_id}")
            .param("channel_id", channel_id)
            .returns(ResponseKind::Channel);
        self.call_as(&route, None).await
    }

    pub async fn get_guild(&self, guild_id: Snowflake) -> ClientResult<Guild> {
        let route = Route::get("/guilds/{guild_id}")
            .param("guild_id", guild_id)
            .returns(ResponseKind::Guild);
        let payload: GuildPayload = self.call_as(&route, None).await?;
        Ok(payload.guild)
    }

    pub async fn get_guild_channels(&self, guild_id: Snowflake) -> ClientResult<Vec<Channel>> {
        let route = Route::get("/guilds/{guild_id}/channels")
            .param("guild_id", guild_id)
            .returns(ResponseKind::Channels);
        let channels: Vec<Channel> = self.call_as(&route, None).await?;
        Ok(channels
            .into_iter()
            .map(|mut channel| {
                channel.guild_id = channel.guild_id.or(Some(guild_id));
                channel
            })
            .collect())
    }

    pub async fn get_guild_roles(&self, guild_id: Snowflake) -> ClientResult<Vec<Role>> {
        let route = Route::get("/guilds/{guild_id}/roles")
            .param("guild_id", guild_id)
            .returns(ResponseKind::Roles);
        let roles: Vec<Role> = self.call_as(&route, None).await?;
        Ok(roles
            .into_iter()
            .map(|mut role| {
                role.guild_id = guild_id;
                role
            })
            .collect())
    }

    pub async fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> ClientResult<Member> {
        let route = Route::get("/guilds/{guild_id}/members/{user_id}")
            .param("guild_id", guild_id)
            .param("user_id", user_id)
            .returns(ResponseKind::Member);
        let value = self.call(&route, None).await?;
        self.member_from(guild_id, value)
    }

    pub async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> ClientResult<Message> {
        let route = Route::get("/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", channel_id)
            .param("message_id", message_id)
            .returns(ResponseKind::Message);
        self.message_call(&route, None).await
    }

    pub async fn create_message(
        &self,
        channel_id: Snowflake,
        message: &CreateMessage,
    ) -> ClientResult<Message> {
        let route = Route::post("/channels/{channel_id}/messages")
            .param("channel_id", channel_id)
            .returns(ResponseKind::Message);
        self.message_call(&route, Some(serde_json::to_value(message)?))
            .await
    }

    pub async fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        content: impl Into<String>,
    ) -> ClientResult<Message> {
        let route = Route::patch("/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", channel_id)
            .param("message_id", message_id)
            .returns(ResponseKind::Message);
        self.message_call(&route, Some(json!({ "content": content.into() })))
            .await
    }

    pub async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> ClientResult<()> {
        let route = Route::delete("/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", channel_id)
            .param("message_id", message_id)
            .returns(ResponseKind::DeletedMessage);
        self.call(&route, None).await.map(|_| ())
    }

    /// One page of channel history, newest first
    pub async fn get_messages(
        &self,
        channel_id: Snowflake,
        query: GetMessages,
    ) -> ClientResult<Vec<Message>> {
        let limit = query
            .limit
            .unwrap_or(50)
            .clamp(1, MAX_MESSAGES_PER_REQUEST);
        let mut route = Route::get("/channels/{channel_id}/messages")
            .param("channel_id", channel_id)
            .query("limit", limit)
            .returns(ResponseKind::Messages);
        if let Some(before) = query.before {
            route = route.query("before", before);
        }
        if let Some(after) = query.after {
            route = route.query("after", after);
        }

        let payloads: Vec<MessagePayload> = self.call_as(&route, None).await?;
        Ok(payloads
            .into_iter()
            .map(|payload| self.message_from(payload).0)
            .collect())
    }

    /// Up to `limit` messages older than `before`, newest first, paging as needed
    pub async fn message_history(
        &self,
        channel_id: Snowflake,
        limit: usize,
        before: Option<Snowflake>,
    ) -> ClientResult<Vec<Message>> {
        let mut messages = Vec::with_capacity(limit.min(usize::from(MAX_MESSAGES_PER_REQUEST)));
        let mut cursor = before;

        while messages.len() < limit {
            let wanted = (limit - messages.len()).min(usize::from(MAX_MESSAGES_PER_REQUEST));
            let page = self
                .get_messages(
                    channel_id,
                    GetMessages {
                        limit: Some(wanted as u8),
                        before: cursor,
                        after: None,
                    },
                )
                .await?;

            let exhausted = page.len() < wanted;
            cursor = page.iter().map(|m| m.id).min().or(cursor);
            messages.extend(page);
            if exhausted {
                break;
            }
        }

        tracing::debug!(channel_id = %channel_id, count = messages.len(), "Fetched message history");
        Ok(messages)
    }

    /// Gateway URL and recommended shard count
    pub async fn get_gateway_bot(&self) -> ClientResult<GatewayBotInfo> {
        let route = Route::get("/gateway/bot");
        self.call_as(&route, None).await
    }

    async fn message_call(&self, route: &Route, body: Option<Value>) -> ClientResult<Message> {
        let payload: MessagePayload = self.call_as(route, body).await?;
        Ok(self.message_from(payload).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_message_body() {
        let body = serde_json::to_value(CreateMessage::new("hi")).unwrap();
        assert_eq!(body, json!({ "content": "hi" }));

        let reply = serde_json::to_value(CreateMessage::new("yo").reply_to(Snowflake::new(9)).tts(true))
            .unwrap();
        assert_eq!(
            reply,
            json!({ "content": "yo", "tts": true, "message_reference": { "message_id": "9" } })
        );
    }

    #[test]
    fn test_gateway_bot_decodes() {
        let info: GatewayBotInfo = serde_json::from_value(json!({
            "url": "wss://gateway.discord.gg",
            "shards": 3,
            "session_start_limit": {
                "total": 1000,
                "remaining": 999,
                "reset_after": 14_400_000,
                "max_concurrency": 1
            }
        }))
        .unwrap();
        assert_eq!(info.shards, 3);
        assert_eq!(info.session_start_limit.max_concurrency, 1);
    }
}
