//! Platform entities - objects mirrored from the remote service

mod channel;
mod guild;
mod member;
mod message;
mod role;
mod user;

pub use channel::{Channel, ChannelType};
pub use guild::{Guild, GuildParts, GuildPayload, UnavailableGuild};
pub use member::{Member, MemberPayload};
pub use message::{Message, MessagePayload};
pub use role::Role;
pub use user::User;
