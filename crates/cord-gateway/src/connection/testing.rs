//! In-memory gateway for tests
//!
//! [`MockConnector`] hands every accepted connection to the test as a
//! [`ServerSide`], which scripts frames toward the session and observes what
//! the session sends back.

use super::{Connector, Frame, GatewayStream};
use crate::error::GatewayError;
use crate::protocol::{GatewayMessage, OpCode};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// How long the helpers wait before failing a test
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame sent by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Close(u16),
}

/// Connector whose connections are driven by the test
#[derive(Debug)]
pub struct MockConnector {
    accepted_tx: mpsc::UnboundedSender<ServerSide>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<ServerSide>>,
    refuse: AtomicU32,
    attempts: AtomicU32,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            accepted_tx,
            accepted_rx: Mutex::new(accepted_rx),
            refuse: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` connection attempts
    pub fn refuse(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next connection
    ///
    /// # Panics
    /// If no connection arrives in time.
    pub async fn accept(&self) -> ServerSide {
        let mut accepted = self.accepted_rx.lock().await;
        tokio::time::timeout(STEP_TIMEOUT, accepted.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayStream>, GatewayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(GatewayError::Connection("connection refused".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let server = ServerSide {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.accepted_tx
            .send(server)
            .map_err(|_| GatewayError::Connection("no server".into()))?;

        Ok(Box::new(MockStream { inbound, outbound }))
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl GatewayStream for MockStream {
    async fn send(&mut self, text: String) -> Result<(), GatewayError> {
        self.outbound
            .send(Sent::Text(text))
            .map_err(|_| GatewayError::Closed {
                code: None,
                reason: "server gone".into(),
            })
    }

    async fn recv(&mut self) -> Option<Result<Frame, GatewayError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
        // The test may have dropped its end already
        let _ = self.outbound.send(Sent::Close(code));
        self.inbound.close();
        Ok(())
    }
}

/// The server's end of one mock connection
#[derive(Debug)]
pub struct ServerSide {
    /// URL the session dialed, query included
    pub url: String,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Sent>,
}

impl ServerSide {
    pub fn send(&self, message: GatewayMessage) {
        let text = message.to_json().expect("serializable message");
        self.send_raw(text);
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        // A session that already hung up just misses the frame
        let _ = self.to_client.send(Frame::Text(text.into()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Frame::Close(Some(code), reason.to_string()));
    }

    /// Next frame from the session; `None` once it dropped the connection
    pub async fn next(&mut self) -> Option<Sent> {
        tokio::time::timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .expect("session sent nothing")
    }

    /// Skip frames until one with `op` arrives
    ///
    /// # Panics
    /// If the connection closes first.
    pub async fn expect_op(&mut self, op: OpCode) -> GatewayMessage {
        loop {
            match self.next().await {
                Some(Sent::Text(text)) => {
                    let message = GatewayMessage::from_json(&text).expect("valid frame");
                    if message.op == op {
                        return message;
                    }
                }
                other => panic!("expected {op}, got {other:?}"),
            }
        }
    }

    /// Close code the session sent when hanging up, skipping other frames
    pub async fn closed(&mut self) -> Option<u16> {
        loop {
            match self.next().await? {
                Sent::Close(code) => return Some(code),
                Sent::Text(_) => {}
            }
        }
    }
}
