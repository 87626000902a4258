//! Decoded gateway events
//!
//! Dispatch payloads are decoded and folded into the object cache before
//! the event is handed to the dispatcher, so handlers always observe a cache
//! that already reflects the event.

use super::EventKind;
use crate::protocol::ReadyPayload;
use cord_cache::{EntityKey, ObjectCache};
use cord_core::{
    Channel, Guild, GuildPayload, Member, MemberPayload, Message, MessagePayload, Role,
    Snowflake, User,
};
use serde::Deserialize;
use serde_json::Value;

/// A dispatch event delivered to handlers
#[derive(Debug, Clone)]
pub struct Event {
    pub shard_id: u32,
    pub seq: Option<u64>,
    pub kind: EventKind,
    /// Event name as sent by the server
    pub name: String,
    pub data: EventData,
}

/// Event payload after decoding
///
/// Delete and update events are delivered whether or not the target was
/// cached; the cached copy is attached when there was one.
#[derive(Debug, Clone)]
pub enum EventData {
    Ready {
        session_id: String,
        resume_gateway_url: Option<String>,
        user: User,
        guilds: Vec<Snowflake>,
    },
    Resumed,
    GuildCreate(Guild),
    GuildUpdate(Guild),
    GuildDelete {
        guild_id: Snowflake,
        /// True when the guild went away because of an outage
        unavailable: bool,
        cached: Option<Guild>,
    },
    RoleCreate(Role),
    RoleUpdate(Role),
    RoleDelete {
        guild_id: Snowflake,
        role_id: Snowflake,
        cached: Option<Role>,
    },
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    MemberAdd(Member),
    MemberUpdate(Member),
    MemberRemove {
        guild_id: Snowflake,
        user: User,
        cached: Option<Member>,
    },
    MessageCreate(Message),
    MessageUpdate {
        id: Snowflake,
        channel_id: Snowflake,
        before: Option<Message>,
        after: Option<Message>,
        /// The partial payload as received
        raw: Value,
    },
    MessageDelete {
        id: Snowflake,
        channel_id: Snowflake,
        guild_id: Option<Snowflake>,
        cached: Option<Message>,
    },
    MessageDeleteBulk {
        ids: Vec<Snowflake>,
        channel_id: Snowflake,
        guild_id: Option<Snowflake>,
        cached: Vec<Message>,
    },
    UserUpdate(User),
    /// Events the client does not interpret
    Other(Value),
}

#[derive(Deserialize)]
struct RoleEvent {
    guild_id: Snowflake,
    role: Role,
}

#[derive(Deserialize)]
struct RoleDeleteEvent {
    guild_id: Snowflake,
    role_id: Snowflake,
}

#[derive(Deserialize)]
struct MemberRemoveEvent {
    guild_id: Snowflake,
    user: User,
}

#[derive(Deserialize)]
struct GuildDeleteEvent {
    id: Snowflake,
    #[serde(default)]
    unavailable: bool,
}

#[derive(Deserialize)]
struct MessageRef {
    id: Snowflake,
    channel_id: Snowflake,
    #[serde(default)]
    guild_id: Option<Snowflake>,
    #[serde(default)]
    author: Option<User>,
}

#[derive(Deserialize)]
struct MessageDeleteBulkEvent {
    ids: Vec<Snowflake>,
    channel_id: Snowflake,
    #[serde(default)]
    guild_id: Option<Snowflake>,
}

impl Event {
    /// Decode a dispatch payload and apply it to the cache
    pub fn decode(
        shard_id: u32,
        seq: Option<u64>,
        name: &str,
        data: Value,
        cache: &ObjectCache,
    ) -> Result<Self, serde_json::Error> {
        let kind = EventKind::from_name(name);
        let data = apply(kind, data, cache)?;
        Ok(Self {
            shard_id,
            seq,
            kind,
            name: name.to_string(),
            data,
        })
    }

    /// Guild the event belongs to, when it names one
    #[must_use]
    pub fn guild_id(&self) -> Option<Snowflake> {
        match &self.data {
            EventData::GuildCreate(guild) | EventData::GuildUpdate(guild) => Some(guild.id),
            EventData::GuildDelete { guild_id, .. }
            | EventData::RoleDelete { guild_id, .. }
            | EventData::MemberRemove { guild_id, .. } => Some(*guild_id),
            EventData::RoleCreate(role) | EventData::RoleUpdate(role) => Some(role.guild_id),
            EventData::ChannelCreate(channel)
            | EventData::ChannelUpdate(channel)
            | EventData::ChannelDelete(channel) => channel.guild_id,
            EventData::MemberAdd(member) | EventData::MemberUpdate(member) => {
                Some(member.guild_id)
            }
            EventData::MessageCreate(message) => message.guild_id,
            EventData::MessageUpdate { after, before, .. } => after
                .as_ref()
                .or(before.as_ref())
                .and_then(|m| m.guild_id),
            EventData::MessageDelete { guild_id, .. }
            | EventData::MessageDeleteBulk { guild_id, .. } => *guild_id,
            _ => None,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(data)
}

fn apply(kind: EventKind, data: Value, cache: &ObjectCache) -> Result<EventData, serde_json::Error> {
    let event = match kind {
        EventKind::Ready => {
            let ready: ReadyPayload = decode(&data)?;
            cache.upsert(ready.user.clone());
            for placeholder in &ready.guilds {
                let mut guild = Guild::new(placeholder.id, "");
                guild.unavailable = true;
                // A full GUILD_CREATE may already be cached after a re-identify
                if cache.guild(placeholder.id).is_none() {
                    cache.upsert(guild);
                }
            }
            EventData::Ready {
                session_id: ready.session_id,
                resume_gateway_url: ready.resume_gateway_url,
                user: ready.user,
                guilds: ready.guilds.iter().map(|g| g.id).collect(),
            }
        }
        EventKind::Resumed => EventData::Resumed,
        EventKind::GuildCreate => {
            let payload: GuildPayload = decode(&data)?;
            let guild = payload.guild.clone();
            cache.upsert_guild(payload.into_parts());
            EventData::GuildCreate(guild)
        }
        EventKind::GuildUpdate => {
            let guild: Guild = decode(&data)?;
            cache.upsert(guild.clone());
            EventData::GuildUpdate(guild)
        }
        EventKind::GuildDelete => {
            let event: GuildDeleteEvent = decode(&data)?;
            let cached = cache.purge_guild(event.id);
            if event.unavailable {
                let mut placeholder = cached.clone().unwrap_or_else(|| Guild::new(event.id, ""));
                placeholder.unavailable = true;
                cache.upsert(placeholder);
            }
            EventData::GuildDelete {
                guild_id: event.id,
                unavailable: event.unavailable,
                cached,
            }
        }
        EventKind::GuildRoleCreate | EventKind::GuildRoleUpdate => {
            let RoleEvent { guild_id, mut role } = decode(&data)?;
            role.guild_id = guild_id;
            cache.upsert(role.clone());
            if kind == EventKind::GuildRoleCreate {
                EventData::RoleCreate(role)
            } else {
                EventData::RoleUpdate(role)
            }
        }
        EventKind::GuildRoleDelete => {
            let event: RoleDeleteEvent = decode(&data)?;
            let cached = cache
                .remove(&EntityKey::Role(event.role_id))
                .and_then(|entity| entity.as_role().cloned());
            EventData::RoleDelete {
                guild_id: event.guild_id,
                role_id: event.role_id,
                cached,
            }
        }
        EventKind::ChannelCreate | EventKind::ChannelUpdate => {
            let channel: Channel = decode(&data)?;
            cache.upsert(channel.clone());
            if kind == EventKind::ChannelCreate {
                EventData::ChannelCreate(channel)
            } else {
                EventData::ChannelUpdate(channel)
            }
        }
        EventKind::ChannelDelete => {
            let channel: Channel = decode(&data)?;
            cache.remove(&EntityKey::Channel(channel.id));
            EventData::ChannelDelete(channel)
        }
        EventKind::GuildMemberAdd | EventKind::GuildMemberUpdate => {
            let payload: MemberPayload = decode(&data)?;
            let guild_id = payload.guild_id.unwrap_or_default();
            let (mut member, user) = payload.into_parts(guild_id);
            // Member updates omit voice state
            if let Some(previous) = cache.member(member.guild_id, member.user_id) {
                member.deaf = previous.deaf;
                member.mute = previous.mute;
                member.joined_at = member.joined_at.or(previous.joined_at);
            }
            cache.upsert(user);
            cache.upsert(member.clone());
            if kind == EventKind::GuildMemberAdd {
                EventData::MemberAdd(member)
            } else {
                EventData::MemberUpdate(member)
            }
        }
        EventKind::GuildMemberRemove => {
            let event: MemberRemoveEvent = decode(&data)?;
            let cached = cache
                .remove(&EntityKey::Member {
                    guild_id: event.guild_id,
                    user_id: event.user.id,
                })
                .and_then(|entity| entity.as_member().cloned());
            cache.upsert(event.user.clone());
            EventData::MemberRemove {
                guild_id: event.guild_id,
                user: event.user,
                cached,
            }
        }
        EventKind::MessageCreate => {
            let (mut message, users) = decode::<MessagePayload>(&data)?.into_parts();
            if message.guild_id.is_none() {
                message.guild_id = cache.channel(message.channel_id).and_then(|c| c.guild_id);
            }
            cache.upsert_all(users);
            cache.upsert(message.clone());
            EventData::MessageCreate(message)
        }
        EventKind::MessageUpdate => {
            let target: MessageRef = decode(&data)?;
            if let Some(author) = target.author {
                cache.upsert(author);
            }
            let changed = cache.update_message(target.id, |message| {
                message.apply_update(&data);
            });
            let (before, after) = match changed {
                Some((before, after)) => (Some(before), Some(after)),
                None => (None, None),
            };
            EventData::MessageUpdate {
                id: target.id,
                channel_id: target.channel_id,
                before,
                after,
                raw: data,
            }
        }
        EventKind::MessageDelete => {
            let target: MessageRef = decode(&data)?;
            let cached = cache.remove_messages(&[target.id]).into_iter().next();
            EventData::MessageDelete {
                id: target.id,
                channel_id: target.channel_id,
                guild_id: target.guild_id,
                cached,
            }
        }
        EventKind::MessageDeleteBulk => {
            let event: MessageDeleteBulkEvent = decode(&data)?;
            let cached = cache.remove_messages(&event.ids);
            EventData::MessageDeleteBulk {
                ids: event.ids,
                channel_id: event.channel_id,
                guild_id: event.guild_id,
                cached,
            }
        }
        EventKind::UserUpdate => {
            let user: User = decode(&data)?;
            cache.upsert(user.clone());
            EventData::UserUpdate(user)
        }
        EventKind::MessageReactionAdd
        | EventKind::MessageReactionRemove
        | EventKind::PresenceUpdate
        | EventKind::TypingStart
        | EventKind::Unknown => EventData::Other(data),
    };
    Ok(event)
}
