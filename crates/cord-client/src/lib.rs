//! # cord-client
//!
//! The caller-facing [`Client`]: one context that owns the rate limiter,
//! object cache, REST dispatcher, event dispatcher and shard coordinator.

pub mod client;

pub use client::{Client, ClientBuilder};

pub use cord_cache::ObjectCache;
pub use cord_common::{ClientConfig, ClientError, ClientResult, ErrorKind};
pub use cord_core::{Channel, Guild, Intents, Member, Message, Role, Snowflake, User};
pub use cord_gateway::{Event, EventData, EventKind, SessionState, ShardInfo, UpdatePresence};
pub use cord_http::{CreateMessage, HttpClient};
