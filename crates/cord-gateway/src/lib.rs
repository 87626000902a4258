//! # cord-gateway
//!
//! Gateway client: wire protocol, per-shard session state machine, shard
//! coordination and event dispatch.

pub mod connection;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;

pub use connection::{Connector, Frame, GatewayStream, TungsteniteConnector};
pub use coordinator::{IdentifyLimiter, ShardCoordinator};
pub use dispatch::{EventDispatcher, Handler};
pub use error::GatewayError;
pub use events::{Event, EventData, EventKind};
pub use protocol::{CloseAction, CloseCode, GatewayMessage, OpCode, UpdatePresence};
pub use session::{SessionConfig, SessionState, ShardInfo};
