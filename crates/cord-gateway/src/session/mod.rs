//! Gateway sessions
//!
//! State machine for a single shard's connection.

mod runner;
mod state;

pub(crate) use runner::wait_shutdown;
pub use runner::{SessionContext, ShardSession};
pub use state::{SessionConfig, SessionState, ShardInfo};
