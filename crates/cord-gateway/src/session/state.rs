//! Session state and shard snapshots

use crate::protocol::UpdatePresence;
use cord_common::{ClientConfig, GatewayConfig};
use cord_core::Intents;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Gateway session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Opening the WebSocket
    Connecting,
    /// Waiting for Hello
    Handshaking,
    /// Identify sent (or waiting for an identify slot)
    Identifying,
    /// Resume sent
    Resuming,
    /// READY or RESUMED received
    Connected,
    /// Connection lost, deciding what to do next
    Disconnected,
    /// Waiting out the delay before the next connection
    Reconnecting,
    /// Terminal: shutdown, fatal error, or exhausted reconnects
    Closed,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub index: u32,
    pub total: u32,
    pub session_id: Option<String>,
    pub last_sequence: Option<u64>,
    pub state: SessionState,
    /// Round trip of the last acknowledged heartbeat
    pub latency: Option<Duration>,
}

impl ShardInfo {
    #[must_use]
    pub const fn new(index: u32, total: u32) -> Self {
        Self {
            index,
            total,
            session_id: None,
            last_sequence: None,
            state: SessionState::Connecting,
            latency: None,
        }
    }
}

/// Everything a session needs to identify
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub token: String,
    pub intents: Intents,
    pub large_threshold: u8,
    /// Base gateway URL, without query
    pub gateway_url: String,
    pub presence: Option<UpdatePresence>,
    pub gateway: GatewayConfig,
}

impl SessionConfig {
    #[must_use]
    pub fn new(config: &ClientConfig, gateway_url: impl Into<String>) -> Self {
        Self {
            token: config.client.token.clone(),
            intents: config.client.intents,
            large_threshold: config.client.large_threshold,
            gateway_url: gateway_url.into(),
            presence: None,
            gateway: config.gateway.clone(),
        }
    }

    #[must_use]
    pub fn with_presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }
}
