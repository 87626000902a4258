//! Guild entity - a server containing channels, roles and members

use serde::{Deserialize, Serialize};

use super::{Channel, Member, MemberPayload, Role, User};
use crate::value_objects::Snowflake;

/// Guild entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub unavailable: bool,
}

impl Guild {
    /// Create a new Guild
    #[must_use]
    pub fn new(id: Snowflake, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            icon: None,
            owner_id: None,
            member_count: None,
            unavailable: false,
        }
    }

    /// Check if a user owns this guild
    #[inline]
    pub fn is_owner(&self, user_id: Snowflake) -> bool {
        self.owner_id == Some(user_id)
    }
}

/// Guild placeholder sent in READY before the full guild arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// Full guild payload as delivered by GUILD_CREATE and the guild endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GuildPayload {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
}

/// A guild payload split into individually cacheable entities
#[derive(Debug, Clone, Default)]
pub struct GuildParts {
    pub guild: Option<Guild>,
    pub channels: Vec<Channel>,
    pub roles: Vec<Role>,
    pub members: Vec<Member>,
    pub users: Vec<User>,
}

impl GuildPayload {
    /// Split into entities, stamping the guild ID onto owned objects
    #[must_use]
    pub fn into_parts(self) -> GuildParts {
        let guild_id = self.guild.id;

        let channels = self
            .channels
            .into_iter()
            .chain(self.threads)
            .map(|mut channel| {
                channel.guild_id = Some(guild_id);
                channel
            })
            .collect();

        let roles = self
            .roles
            .into_iter()
            .map(|mut role| {
                role.guild_id = guild_id;
                role
            })
            .collect();

        let (members, users) = self
            .members
            .into_iter()
            .map(|member| member.into_parts(guild_id))
            .unzip();

        GuildParts {
            guild: Some(self.guild),
            channels,
            roles,
            members,
            users,
        }
    }
}
