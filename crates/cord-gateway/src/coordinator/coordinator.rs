//! Shard coordinator
//!
//! Starts one supervised session per shard, shares the identify limiter
//! between them and reports fatal errors to the application.

use super::IdentifyLimiter;
use crate::connection::Connector;
use crate::dispatch::EventDispatcher;
use crate::events::Event;
use crate::protocol::{UpdatePresence, DEFAULT_GATEWAY_URL};
use crate::session::{wait_shutdown, SessionConfig, SessionContext, ShardInfo, ShardSession};
use cord_cache::ObjectCache;
use cord_common::{Backoff, ClientConfig, ClientError, ClientResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct Tasks {
    supervisors: Vec<JoinHandle<()>>,
    pumps: Vec<JoinHandle<()>>,
}

/// Runs and supervises every shard of one bot
pub struct ShardCoordinator {
    config: ClientConfig,
    presence: Option<UpdatePresence>,
    connector: Arc<dyn Connector>,
    cache: Arc<ObjectCache>,
    dispatcher: Arc<EventDispatcher>,

    shutdown: watch::Sender<bool>,
    statuses: RwLock<Vec<watch::Receiver<ShardInfo>>>,
    tasks: Mutex<Tasks>,
    fatal_tx: mpsc::UnboundedSender<ClientError>,
    fatal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientError>>,
    started: AtomicBool,
}

impl ShardCoordinator {
    #[must_use]
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        cache: Arc<ObjectCache>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            config: config.clone(),
            presence: None,
            connector,
            cache,
            dispatcher,
            shutdown,
            statuses: RwLock::new(Vec::new()),
            tasks: Mutex::new(Tasks::default()),
            fatal_tx,
            fatal_rx: tokio::sync::Mutex::new(fatal_rx),
            started: AtomicBool::new(false),
        }
    }

    /// Presence to identify with
    #[must_use]
    pub fn with_presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Start `shard_count` shards using the configured gateway URL and concurrency
    pub fn start(&self, shard_count: u32) -> ClientResult<()> {
        let url = self
            .config
            .client
            .gateway_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        self.start_with(&url, shard_count, self.config.shards.max_concurrency)
    }

    /// Start shards against an explicit gateway URL
    ///
    /// `max_concurrency` is the number of identifies the server accepts per
    /// identify interval.
    pub fn start_with(
        &self,
        gateway_url: &str,
        shard_count: u32,
        max_concurrency: u32,
    ) -> ClientResult<()> {
        if shard_count == 0 {
            return Err(ClientError::Config("shard count must be at least 1".into()));
        }
        if *self.shutdown.borrow() {
            return Err(ClientError::Closed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::internal("shards already started"));
        }

        let mut session_config = SessionConfig::new(&self.config, gateway_url);
        session_config.presence.clone_from(&self.presence);
        let ctx = SessionContext {
            config: Arc::new(session_config),
            connector: Arc::clone(&self.connector),
            identify: IdentifyLimiter::new(self.config.shards.identify_interval(), max_concurrency),
            cache: Arc::clone(&self.cache),
        };

        let mut statuses = Vec::with_capacity(shard_count as usize);
        let mut tasks = self.tasks.lock();
        for index in 0..shard_count {
            let (status_tx, status_rx) = watch::channel(ShardInfo::new(index, shard_count));
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            statuses.push(status_rx);

            tasks
                .pumps
                .push(tokio::spawn(pump(index, events_rx, Arc::clone(&self.dispatcher))));

            let supervisor = Supervisor {
                ctx: ctx.clone(),
                index,
                total: shard_count,
                events: events_tx,
                status: Arc::new(status_tx),
                shutdown: self.shutdown.subscribe(),
                fatal: self.fatal_tx.clone(),
                max_restarts: self.config.shards.max_shard_restarts,
                backoff: Backoff::from_millis(
                    self.config.shards.restart_base_ms,
                    self.config.shards.restart_max_ms,
                ),
                stable: self.config.gateway.stable_connection(),
            };
            tasks.supervisors.push(tokio::spawn(supervisor.run()));
        }
        *self.statuses.write() = statuses;

        tracing::info!(
            shards = shard_count,
            max_concurrency,
            gateway_url = %gateway_url,
            "Shards started"
        );
        Ok(())
    }

    /// Number of shards started
    pub fn shard_count(&self) -> u32 {
        self.statuses.read().len() as u32
    }

    /// Snapshot of one shard
    pub fn shard_status(&self, index: u32) -> Option<ShardInfo> {
        self.statuses
            .read()
            .get(index as usize)
            .map(|status| status.borrow().clone())
    }

    /// Watch one shard's status
    pub fn subscribe_status(&self, index: u32) -> Option<watch::Receiver<ShardInfo>> {
        self.statuses.read().get(index as usize).cloned()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop every shard and wait for queued events to be delivered
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());

        // Supervisors own the event senders; pumps drain and exit after them
        for handle in tasks.supervisors.into_iter().chain(tasks.pumps) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Shard task panicked");
            }
        }
        tracing::info!("Shards stopped");
    }

    /// Wait for the first fatal error, or `Ok` once shut down
    pub async fn wait(&self) -> ClientResult<()> {
        let mut fatal = self.fatal_rx.lock().await;
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            biased;
            Some(err) = fatal.recv() => Err(err),
            () = wait_shutdown(&mut shutdown) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator")
            .field("shards", &self.shard_count())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Restarts one shard's session until shutdown or a fatal error
struct Supervisor {
    ctx: SessionContext,
    index: u32,
    total: u32,
    events: mpsc::UnboundedSender<Event>,
    status: Arc<watch::Sender<ShardInfo>>,
    shutdown: watch::Receiver<bool>,
    fatal: mpsc::UnboundedSender<ClientError>,
    max_restarts: u32,
    backoff: Backoff,
    stable: Duration,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            let started = Instant::now();
            let session = ShardSession::new(
                self.ctx.clone(),
                self.index,
                self.total,
                self.events.clone(),
                Arc::clone(&self.status),
                self.shutdown.clone(),
            );

            let err = match session.run().await {
                Ok(()) => return,
                Err(_) if *self.shutdown.borrow() => return,
                Err(err) if err.is_fatal() => {
                    tracing::error!(shard_id = self.index, error = %err, "Shard stopped");
                    let _ = self.fatal.send(err);
                    return;
                }
                Err(err) => err,
            };
            // The next session identifies from scratch
            self.ctx.cache.invalidate_shard(self.index, self.total);

            if started.elapsed() >= self.stable {
                self.backoff.reset();
            }
            if self.backoff.attempts() >= self.max_restarts {
                tracing::error!(
                    shard_id = self.index,
                    restarts = self.backoff.attempts(),
                    error = %err,
                    "Shard restarts exhausted"
                );
                let _ = self.fatal.send(ClientError::ConnectionLost(format!(
                    "shard {} gave up after {} restarts: {err}",
                    self.index,
                    self.backoff.attempts()
                )));
                return;
            }

            let delay = self.backoff.next_delay();
            tracing::warn!(
                shard_id = self.index,
                error = %err,
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Restarting shard"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = wait_shutdown(&mut self.shutdown) => return,
            }
        }
    }
}

/// Delivers one shard's events in arrival order
async fn pump(
    index: u32,
    mut events: mpsc::UnboundedReceiver<Event>,
    dispatcher: Arc<EventDispatcher>,
) {
    while let Some(event) = events.recv().await {
        dispatcher.dispatch(Arc::new(event)).await;
    }
    tracing::debug!(shard_id = index, "Event pump stopped");
}
