//! # cord-cache
//!
//! In-memory object cache shared by gateway sessions, the REST dispatcher and
//! application code.
//!
//! ## Example
//!
//! ```
//! use cord_cache::{EntityKey, ObjectCache};
//! use cord_core::{Snowflake, User};
//!
//! let cache = ObjectCache::default();
//! cache.upsert(User::new(Snowflake::new(42), "ann"));
//!
//! let user = cache.get(&EntityKey::User(Snowflake::new(42)));
//! assert!(user.is_some());
//! ```

pub mod key;
pub mod store;

pub use key::{Entity, EntityKey, EntityKind};
pub use store::{ObjectCache, PurgeStats, DEFAULT_MAX_MESSAGES};
