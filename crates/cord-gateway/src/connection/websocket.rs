//! WebSocket connector backed by tokio-tungstenite

use super::transport::{Connector, Frame, GatewayStream};
use crate::error::GatewayError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Connects over TLS WebSockets
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

struct TungsteniteStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayStream>, GatewayError> {
        let (inner, _response) = connect_async(url)
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        tracing::debug!(url = %url, "WebSocket connected");
        Ok(Box::new(TungsteniteStream { inner }))
    }
}

#[async_trait]
impl GatewayStream for TungsteniteStream {
    async fn send(&mut self, text: String) -> Result<(), GatewayError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, GatewayError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(GatewayError::Connection(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        return Some(Err(GatewayError::Decode(
                            "binary frame is not UTF-8".to_string(),
                        )))
                    }
                },
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.into_owned())
                    });
                    return Some(Ok(Frame::Close(code, reason)));
                }
                // Pings are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        self.inner
            .close(Some(frame))
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))
    }
}
