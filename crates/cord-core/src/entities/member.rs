//! Member entity - a user's membership in a guild

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::User;
use crate::value_objects::Snowflake;

/// Guild member entity
///
/// Keyed by `(guild_id, user_id)`; the user itself lives in the cache separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

impl Member {
    /// Create a new Member
    #[must_use]
    pub fn new(guild_id: Snowflake, user_id: Snowflake) -> Self {
        Self {
            guild_id,
            user_id,
            nick: None,
            roles: Vec::new(),
            joined_at: None,
            deaf: false,
            mute: false,
        }
    }

    /// Check if member has a specific role
    #[inline]
    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.roles.contains(&role_id)
    }
}

/// Member as sent on the wire, with the user object embedded
#[derive(Debug, Clone, Deserialize)]
pub struct MemberPayload {
    pub user: User,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

impl MemberPayload {
    /// Split into the member and its user
    ///
    /// `guild_id` is used when the payload itself does not name its guild.
    #[must_use]
    pub fn into_parts(self, guild_id: Snowflake) -> (Member, User) {
        let member = Member {
            guild_id: self.guild_id.unwrap_or(guild_id),
            user_id: self.user.id,
            nick: self.nick,
            roles: self.roles,
            joined_at: self.joined_at,
            deaf: self.deaf,
            mute: self.mute,
        };
        (member, self.user)
    }
}
