//! # cord-core
//!
//! Domain layer containing platform entities and value objects.
//! This crate has no dependencies on networking, caching or the async runtime.

pub mod entities;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    Channel, ChannelType, Guild, GuildParts, GuildPayload, Member, MemberPayload, Message,
    MessagePayload, Role, UnavailableGuild, User,
};
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
