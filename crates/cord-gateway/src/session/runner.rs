//! Gateway session runner
//!
//! A [`ShardSession`] owns one shard's connection for its whole life: it
//! connects, handshakes, heartbeats, decodes dispatches and reconnects until
//! it is shut down or hits an error it cannot recover from.

use super::{SessionConfig, SessionState, ShardInfo};
use crate::connection::{Connector, Frame, GatewayStream};
use crate::coordinator::IdentifyLimiter;
use crate::error::GatewayError;
use crate::events::{Event, EventData};
use crate::protocol::{
    connect_url, CloseAction, GatewayMessage, HelloPayload, IdentifyPayload, IdentifyProperties,
    OpCode, ResumePayload,
};
use cord_cache::ObjectCache;
use cord_common::{random_between, Backoff, ClientError, ClientResult};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Close code that keeps the session resumable
const RESUMABLE_CLOSE: u16 = 4000;

/// Close code that ends the session on the server
const NORMAL_CLOSE: u16 = 1000;

/// Shared pieces every session of a coordinator uses
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<SessionConfig>,
    pub connector: Arc<dyn Connector>,
    pub identify: IdentifyLimiter,
    pub cache: Arc<ObjectCache>,
}

/// How one connection ended
#[derive(Debug)]
enum Outcome {
    Shutdown,
    Fatal(ClientError),
    Reconnect {
        /// Keep the session id and sequence for a resume
        resumable: bool,
        /// Fixed delay; `None` uses the reconnect backoff
        delay: Option<Duration>,
        /// Counts toward `max_reconnect_attempts`
        failed: bool,
    },
}

impl Outcome {
    const fn lost() -> Self {
        Self::Reconnect {
            resumable: true,
            delay: None,
            failed: true,
        }
    }
}

/// Heartbeat bookkeeping for one connection
struct Heartbeat {
    unacked: u32,
    sent_at: Option<Instant>,
}

/// One shard's gateway session
pub struct ShardSession {
    ctx: SessionContext,
    index: u32,
    total: u32,
    events: mpsc::UnboundedSender<Event>,
    status: Arc<watch::Sender<ShardInfo>>,
    shutdown: watch::Receiver<bool>,

    session_id: Option<String>,
    seq: Option<u64>,
    resume_url: Option<String>,
    invalid_sessions: u32,
    violations: u32,
    connected_at: Option<Instant>,
}

impl ShardSession {
    #[must_use]
    pub fn new(
        ctx: SessionContext,
        index: u32,
        total: u32,
        events: mpsc::UnboundedSender<Event>,
        status: Arc<watch::Sender<ShardInfo>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            index,
            total,
            events,
            status,
            shutdown,
            session_id: None,
            seq: None,
            resume_url: None,
            invalid_sessions: 0,
            violations: 0,
            connected_at: None,
        }
    }

    /// Run until shutdown (`Ok`) or an unrecoverable error
    pub async fn run(mut self) -> ClientResult<()> {
        let policy = self.ctx.config.gateway.clone();
        let mut backoff = Backoff::from_millis(policy.reconnect_base_ms, policy.reconnect_max_ms);

        loop {
            let outcome = self.connect_once().await;

            if self
                .connected_at
                .take()
                .is_some_and(|at| at.elapsed() >= policy.stable_connection())
            {
                backoff.reset();
            }

            match outcome {
                Outcome::Shutdown => {
                    self.set_state(SessionState::Closed);
                    tracing::info!(shard_id = self.index, "Session shut down");
                    return Ok(());
                }
                Outcome::Fatal(err) => {
                    self.set_state(SessionState::Closed);
                    tracing::error!(shard_id = self.index, error = %err, "Session failed");
                    return Err(err);
                }
                Outcome::Reconnect {
                    resumable,
                    delay,
                    failed,
                } => {
                    if !resumable {
                        self.clear_session();
                    }
                    self.set_state(SessionState::Disconnected);

                    let delay = if failed {
                        if backoff.attempts() >= policy.max_reconnect_attempts {
                            self.set_state(SessionState::Closed);
                            tracing::error!(
                                shard_id = self.index,
                                attempts = backoff.attempts(),
                                "Reconnect attempts exhausted"
                            );
                            return Err(ClientError::ConnectionLost(format!(
                                "shard {} failed to reconnect after {} attempts",
                                self.index,
                                backoff.attempts()
                            )));
                        }
                        backoff.next_delay()
                    } else {
                        delay.unwrap_or(Duration::ZERO)
                    };

                    self.set_state(SessionState::Reconnecting);
                    tracing::debug!(
                        shard_id = self.index,
                        resumable = self.resume_payload().is_some(),
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting"
                    );

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = wait_shutdown(&mut self.shutdown) => {
                            self.set_state(SessionState::Closed);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// One connection from dial to close
    async fn connect_once(&mut self) -> Outcome {
        let base = match (&self.resume_url, self.resume_payload()) {
            (Some(url), Some(_)) => url.clone(),
            _ => self.ctx.config.gateway_url.clone(),
        };
        let url = connect_url(&base);

        self.set_state(SessionState::Connecting);
        tracing::info!(shard_id = self.index, url = %url, "Connecting to gateway");

        let connector = Arc::clone(&self.ctx.connector);
        let connected = tokio::select! {
            result = connector.connect(&url) => result,
            () = wait_shutdown(&mut self.shutdown) => return Outcome::Shutdown,
        };

        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(shard_id = self.index, error = %e, "Gateway connect failed");
                return Outcome::lost();
            }
        };

        let outcome = self.drive(stream.as_mut()).await;

        let code = match &outcome {
            Outcome::Reconnect {
                resumable: true, ..
            } => RESUMABLE_CLOSE,
            _ => NORMAL_CLOSE,
        };
        if let Err(e) = stream.close(code).await {
            tracing::trace!(shard_id = self.index, error = %e, "Close frame not sent");
        }

        outcome
    }

    async fn drive(&mut self, stream: &mut dyn GatewayStream) -> Outcome {
        self.set_state(SessionState::Handshaking);
        let hello = match self.await_hello(stream).await {
            Ok(hello) => hello,
            Err(outcome) => return outcome,
        };
        let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
        tracing::debug!(
            shard_id = self.index,
            heartbeat_interval_ms = hello.heartbeat_interval,
            "Hello received"
        );

        // Identify waits for a slot in the loop below so heartbeats keep flowing
        let mut identify_slot: Option<BoxFuture<'static, Result<(), GatewayError>>> = None;
        if let Some(resume) = self.resume_payload() {
            self.set_state(SessionState::Resuming);
            tracing::info!(
                shard_id = self.index,
                session_id = %resume.session_id,
                seq = resume.seq,
                "Resuming session"
            );
            let sent = match GatewayMessage::resume(&resume) {
                Ok(message) => self.send(stream, &message).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = sent {
                tracing::warn!(shard_id = self.index, error = %e, "Failed to send Resume");
                return Outcome::lost();
            }
        } else {
            self.set_state(SessionState::Identifying);
            let limiter = self.ctx.identify.clone();
            identify_slot = Some(Box::pin(async move { limiter.acquire().await }));
        }

        let first_beat = Instant::now() + interval.mul_f64(rand::random::<f64>());
        let mut ticker = tokio::time::interval_at(first_beat, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = Heartbeat {
            unacked: 0,
            sent_at: None,
        };
        let missed_ack_limit = self.ctx.config.gateway.missed_ack_limit;

        loop {
            tokio::select! {
                () = wait_shutdown(&mut self.shutdown) => return Outcome::Shutdown,

                granted = async {
                    match identify_slot.as_mut() {
                        Some(slot) => slot.await,
                        None => std::future::pending().await,
                    }
                }, if identify_slot.is_some() => {
                    identify_slot = None;
                    if granted.is_err() {
                        return Outcome::Shutdown;
                    }
                    if let Err(e) = self.send_identify(stream).await {
                        tracing::warn!(shard_id = self.index, error = %e, "Failed to send Identify");
                        return Outcome::lost();
                    }
                }

                _ = ticker.tick() => {
                    if heartbeat.unacked >= missed_ack_limit {
                        tracing::warn!(
                            shard_id = self.index,
                            unacked = heartbeat.unacked,
                            "Heartbeat not acknowledged; connection zombied"
                        );
                        return Outcome::lost();
                    }
                    if let Err(e) = self.send(stream, &GatewayMessage::heartbeat(self.seq)).await {
                        tracing::warn!(shard_id = self.index, error = %e, "Failed to send heartbeat");
                        return Outcome::lost();
                    }
                    heartbeat.unacked += 1;
                    heartbeat.sent_at = Some(Instant::now());
                }

                frame = stream.recv() => {
                    let text = match frame {
                        Some(Ok(Frame::Text(text))) => text,
                        Some(Ok(Frame::Close(code, reason))) => return self.on_close(code, &reason),
                        Some(Err(e)) => {
                            tracing::warn!(shard_id = self.index, error = %e, "Gateway read failed");
                            return Outcome::lost();
                        }
                        None => {
                            tracing::warn!(shard_id = self.index, "Gateway stream ended");
                            return Outcome::lost();
                        }
                    };

                    match self.handle_text(stream, &text, &mut heartbeat).await {
                        Ok(None) => self.violations = 0,
                        Ok(Some(outcome)) => return outcome,
                        Err(e) => {
                            self.violations += 1;
                            tracing::warn!(
                                shard_id = self.index,
                                error = %e,
                                violations = self.violations,
                                "Dropped malformed frame"
                            );
                            if self.violations > self.ctx.config.gateway.max_protocol_violations {
                                self.violations = 0;
                                return Outcome::lost();
                            }
                        }
                    }
                }
            }
        }
    }

    async fn await_hello(
        &mut self,
        stream: &mut dyn GatewayStream,
    ) -> Result<HelloPayload, Outcome> {
        let timeout = self.ctx.config.gateway.hello_timeout();
        let frame = tokio::select! {
            frame = tokio::time::timeout(timeout, stream.recv()) => frame,
            () = wait_shutdown(&mut self.shutdown) => return Err(Outcome::Shutdown),
        };

        match frame {
            Ok(Some(Ok(Frame::Text(text)))) => {
                match GatewayMessage::from_json(&text).ok().and_then(|m| m.as_hello()) {
                    Some(hello) => Ok(hello),
                    None => {
                        tracing::warn!(shard_id = self.index, "Expected Hello as first frame");
                        Err(Outcome::lost())
                    }
                }
            }
            Ok(Some(Ok(Frame::Close(code, reason)))) => Err(self.on_close(code, &reason)),
            Ok(Some(Err(e))) => {
                tracing::warn!(shard_id = self.index, error = %e, "Gateway read failed");
                Err(Outcome::lost())
            }
            Ok(None) => Err(Outcome::lost()),
            Err(_) => {
                tracing::warn!(
                    shard_id = self.index,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for Hello"
                );
                Err(Outcome::lost())
            }
        }
    }

    /// Handle one text frame; `Ok(Some)` ends the connection
    async fn handle_text(
        &mut self,
        stream: &mut dyn GatewayStream,
        text: &str,
        heartbeat: &mut Heartbeat,
    ) -> Result<Option<Outcome>, GatewayError> {
        let message = GatewayMessage::from_json(text)?;
        tracing::trace!(shard_id = self.index, op = %message.op, seq = ?message.s, "Frame received");

        match message.op {
            OpCode::Dispatch => {
                self.handle_dispatch(message)?;
                Ok(None)
            }
            OpCode::Heartbeat => {
                if let Err(e) = self.send(stream, &GatewayMessage::heartbeat(self.seq)).await {
                    tracing::warn!(shard_id = self.index, error = %e, "Failed to answer heartbeat");
                    return Ok(Some(Outcome::lost()));
                }
                Ok(None)
            }
            OpCode::HeartbeatAck => {
                heartbeat.unacked = 0;
                if let Some(sent_at) = heartbeat.sent_at.take() {
                    let latency = sent_at.elapsed();
                    self.status.send_modify(|info| info.latency = Some(latency));
                    tracing::trace!(
                        shard_id = self.index,
                        latency_ms = latency.as_millis() as u64,
                        "Heartbeat acknowledged"
                    );
                }
                Ok(None)
            }
            OpCode::Reconnect => {
                tracing::info!(shard_id = self.index, "Server requested reconnect");
                Ok(Some(Outcome::Reconnect {
                    resumable: true,
                    delay: Some(Duration::ZERO),
                    failed: false,
                }))
            }
            OpCode::InvalidSession => {
                let resumable = message
                    .as_invalid_session()
                    .ok_or_else(|| GatewayError::Decode("invalid session without flag".into()))?;
                Ok(Some(self.on_invalid_session(resumable)))
            }
            other => {
                tracing::debug!(shard_id = self.index, op = %other, "Ignoring unexpected opcode");
                Ok(None)
            }
        }
    }

    fn handle_dispatch(&mut self, message: GatewayMessage) -> Result<(), GatewayError> {
        let name = message
            .t
            .ok_or_else(|| GatewayError::Decode("dispatch without event name".into()))?;

        if let Some(seq) = message.s {
            if self.seq.is_some_and(|last| seq <= last) {
                tracing::debug!(shard_id = self.index, seq, event = %name, "Skipping replayed event");
                return Ok(());
            }
            self.seq = Some(seq);
            self.status.send_modify(|info| info.last_sequence = Some(seq));
        }

        let data = message.d.unwrap_or(Value::Null);
        let event = Event::decode(self.index, message.s, &name, data, &self.ctx.cache)?;

        match &event.data {
            EventData::Ready {
                session_id,
                resume_gateway_url,
                guilds,
                ..
            } => {
                self.session_id = Some(session_id.clone());
                self.resume_url.clone_from(resume_gateway_url);
                self.invalid_sessions = 0;
                self.connected_at = Some(Instant::now());
                self.set_state(SessionState::Connected);
                tracing::info!(
                    shard_id = self.index,
                    session_id = %session_id,
                    guilds = guilds.len(),
                    "Session ready"
                );
            }
            EventData::Resumed => {
                self.connected_at = Some(Instant::now());
                self.set_state(SessionState::Connected);
                tracing::info!(shard_id = self.index, seq = ?self.seq, "Session resumed");
            }
            _ => {}
        }

        if self.events.send(event).is_err() {
            tracing::debug!(shard_id = self.index, event = %name, "Event receiver dropped");
        }
        Ok(())
    }

    fn on_invalid_session(&mut self, resumable: bool) -> Outcome {
        let policy = &self.ctx.config.gateway;
        let delay = random_between(
            Duration::from_millis(policy.invalid_session_delay_min_ms),
            Duration::from_millis(policy.invalid_session_delay_max_ms),
        );

        if resumable {
            tracing::warn!(shard_id = self.index, "Session invalidated; resuming");
            return Outcome::Reconnect {
                resumable: true,
                delay: Some(delay),
                failed: false,
            };
        }

        self.invalid_sessions += 1;
        if self.invalid_sessions > policy.max_invalid_sessions {
            return Outcome::Fatal(ClientError::AuthenticationFailed(format!(
                "session invalidated {} times in a row",
                self.invalid_sessions
            )));
        }

        self.clear_session();
        tracing::warn!(
            shard_id = self.index,
            delay_ms = delay.as_millis() as u64,
            "Session invalidated; re-identifying"
        );
        Outcome::Reconnect {
            resumable: false,
            delay: Some(delay),
            failed: false,
        }
    }

    fn on_close(&self, code: Option<u16>, reason: &str) -> Outcome {
        match CloseAction::for_code(code) {
            CloseAction::Fatal(err) => {
                tracing::error!(shard_id = self.index, code = ?code, reason, "Gateway closed with fatal code");
                Outcome::Fatal(err)
            }
            CloseAction::Reidentify => {
                tracing::warn!(shard_id = self.index, code = ?code, reason, "Gateway closed; session lost");
                Outcome::Reconnect {
                    resumable: false,
                    delay: None,
                    failed: true,
                }
            }
            CloseAction::Resume => {
                tracing::warn!(shard_id = self.index, code = ?code, reason, "Gateway closed");
                Outcome::lost()
            }
        }
    }

    async fn send_identify(&self, stream: &mut dyn GatewayStream) -> Result<(), GatewayError> {
        let config = &self.ctx.config;
        let payload = IdentifyPayload {
            token: config.token.clone(),
            intents: config.intents,
            properties: IdentifyProperties::default(),
            shard: [self.index, self.total],
            large_threshold: config.large_threshold,
            presence: config.presence.clone(),
        };
        tracing::info!(shard_id = self.index, total = self.total, "Identifying");
        self.send(stream, &GatewayMessage::identify(&payload)?).await
    }

    async fn send(
        &self,
        stream: &mut dyn GatewayStream,
        message: &GatewayMessage,
    ) -> Result<(), GatewayError> {
        let json = message.to_json()?;
        tracing::trace!(shard_id = self.index, op = %message.op, "Sending frame");
        stream.send(json).await
    }

    fn resume_payload(&self) -> Option<ResumePayload> {
        match (&self.session_id, self.seq) {
            (Some(session_id), Some(seq)) => Some(ResumePayload {
                token: self.ctx.config.token.clone(),
                session_id: session_id.clone(),
                seq,
            }),
            _ => None,
        }
    }

    /// Forget the session; a fresh identify replays every guild, so the shard's cache goes too
    fn clear_session(&mut self) {
        let had_session = self.session_id.take().is_some() | self.seq.take().is_some();
        self.resume_url = None;
        if had_session {
            let purged = self.ctx.cache.invalidate_shard(self.index, self.total);
            tracing::debug!(shard_id = self.index, purged_guilds = purged.len(), "Session dropped");
        }
    }

    fn set_state(&self, state: SessionState) {
        self.status.send_modify(|info| {
            info.state = state;
            info.session_id.clone_from(&self.session_id);
            info.last_sequence = self.seq;
        });
        tracing::debug!(shard_id = self.index, state = %state, "Session state changed");
    }
}

/// Resolves once shutdown is signalled or the signal is dropped
pub(crate) async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
