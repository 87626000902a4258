//! Connection abstraction
//!
//! Sessions speak to the gateway through [`Connector`] and [`GatewayStream`],
//! so the protocol logic runs unchanged over a real socket or an in-memory
//! script.

use crate::error::GatewayError;
use async_trait::async_trait;

/// Inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close frame with the server's code and reason
    Close(Option<u16>, String),
}

/// An open gateway connection
#[async_trait]
pub trait GatewayStream: Send {
    async fn send(&mut self, text: String) -> Result<(), GatewayError>;

    /// Next inbound frame; `None` once the stream has ended
    ///
    /// Must be cancel safe: sessions poll it inside `select!`.
    async fn recv(&mut self) -> Option<Result<Frame, GatewayError>>;

    async fn close(&mut self, code: u16) -> Result<(), GatewayError>;
}

/// Opens gateway connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayStream>, GatewayError>;
}
