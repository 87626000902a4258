//! Shard coordination
//!
//! The identify limiter shared by every shard and the supervisor that keeps
//! shards running.

mod coordinator;
mod identify;

pub use coordinator::ShardCoordinator;
pub use identify::IdentifyLimiter;
