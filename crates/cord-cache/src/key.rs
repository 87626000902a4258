//! Cache keys and the entity wrapper stored in the cache

use cord_core::{Channel, Guild, Member, Message, Role, Snowflake, User};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cached entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Guild,
    Channel,
    Role,
    Member,
    Message,
}

impl EntityKind {
    /// All kinds, in lock acquisition order
    pub const ALL: [Self; 6] = [
        Self::User,
        Self::Guild,
        Self::Channel,
        Self::Role,
        Self::Member,
        Self::Message,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Guild => "guild",
            Self::Channel => "channel",
            Self::Role => "role",
            Self::Member => "member",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cached entity
///
/// Members have no ID of their own and are keyed by guild and user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    User(Snowflake),
    Guild(Snowflake),
    Channel(Snowflake),
    Role(Snowflake),
    Member { guild_id: Snowflake, user_id: Snowflake },
    Message(Snowflake),
}

impl EntityKey {
    /// Build a key from a kind and a single ID
    ///
    /// Returns `None` for members, which need two IDs.
    #[must_use]
    pub const fn from_id(kind: EntityKind, id: Snowflake) -> Option<Self> {
        match kind {
            EntityKind::User => Some(Self::User(id)),
            EntityKind::Guild => Some(Self::Guild(id)),
            EntityKind::Channel => Some(Self::Channel(id)),
            EntityKind::Role => Some(Self::Role(id)),
            EntityKind::Message => Some(Self::Message(id)),
            EntityKind::Member => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Guild(_) => EntityKind::Guild,
            Self::Channel(_) => EntityKind::Channel,
            Self::Role(_) => EntityKind::Role,
            Self::Member { .. } => EntityKind::Member,
            Self::Message(_) => EntityKind::Message,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member { guild_id, user_id } => write!(f, "member {guild_id}/{user_id}"),
            Self::User(id)
            | Self::Guild(id)
            | Self::Channel(id)
            | Self::Role(id)
            | Self::Message(id) => write!(f, "{} {id}", self.kind()),
        }
    }
}

/// A cacheable entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Entity {
    User(User),
    Guild(Guild),
    Channel(Channel),
    Role(Role),
    Member(Member),
    Message(Message),
}

impl Entity {
    #[must_use]
    pub fn key(&self) -> EntityKey {
        match self {
            Self::User(user) => EntityKey::User(user.id),
            Self::Guild(guild) => EntityKey::Guild(guild.id),
            Self::Channel(channel) => EntityKey::Channel(channel.id),
            Self::Role(role) => EntityKey::Role(role.id),
            Self::Member(member) => EntityKey::Member {
                guild_id: member.guild_id,
                user_id: member.user_id,
            },
            Self::Message(message) => EntityKey::Message(message.id),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }

    pub fn as_user(&self) -> Option<&User> {
        match self {
            Self::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn as_guild(&self) -> Option<&Guild> {
        match self {
            Self::Guild(guild) => Some(guild),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Channel> {
        match self {
            Self::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn as_role(&self) -> Option<&Role> {
        match self {
            Self::Role(role) => Some(role),
            _ => None,
        }
    }

    pub fn as_member(&self) -> Option<&Member> {
        match self {
            Self::Member(member) => Some(member),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

impl From<User> for Entity {
    fn from(value: User) -> Self {
        Self::User(value)
    }
}

impl From<Guild> for Entity {
    fn from(value: Guild) -> Self {
        Self::Guild(value)
    }
}

impl From<Channel> for Entity {
    fn from(value: Channel) -> Self {
        Self::Channel(value)
    }
}

impl From<Role> for Entity {
    fn from(value: Role) -> Self {
        Self::Role(value)
    }
}

impl From<Member> for Entity {
    fn from(value: Member) -> Self {
        Self::Member(value)
    }
}

impl From<Message> for Entity {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}
