//! Gateway protocol definitions
//!
//! Op codes, message envelope, close codes and control payloads.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseAction, CloseCode};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload,
    UpdatePresence,
};

/// Gateway protocol version
pub const GATEWAY_VERSION: u8 = 10;

/// Gateway URL used when neither configuration nor discovery supplies one
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Append the version and encoding query to a gateway base URL
#[must_use]
pub fn connect_url(base: &str) -> String {
    format!(
        "{}/?v={GATEWAY_VERSION}&encoding=json",
        base.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_url() {
        assert_eq!(
            connect_url("wss://gateway.discord.gg"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            connect_url("wss://resume.example/"),
            "wss://resume.example/?v=10&encoding=json"
        );
    }
}
