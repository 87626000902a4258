//! Gateway connections

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
mod transport;
mod websocket;

pub use transport::{Connector, Frame, GatewayStream};
pub use websocket::TungsteniteConnector;
