//! Event dispatcher
//!
//! Routes decoded events to registered handlers. Handlers for one event run
//! one after another in registration order; a handler that fails or panics
//! is logged and skipped.

use crate::events::{Event, EventKind};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Type-erased event handler
pub type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    order: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<EventKind, Vec<Registered>>,
    any: Vec<Registered>,
    next: u64,
}

impl Registry {
    fn next_order(&mut self) -> u64 {
        let order = self.next;
        self.next += 1;
        order
    }

    /// Handlers for `kind`, in registration order
    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        let specific = self.by_kind.get(&kind).map_or(&[][..], Vec::as_slice);
        let mut merged: Vec<&Registered> = specific.iter().chain(&self.any).collect();
        merged.sort_by_key(|r| r.order);
        merged.into_iter().map(|r| Arc::clone(&r.handler)).collect()
    }
}

/// Fans events out to handlers
#[derive(Default)]
pub struct EventDispatcher {
    registry: RwLock<Registry>,
    delivered: AtomicU64,
    failures: AtomicU64,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    pub fn register<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut registry = self.registry.write();
        let order = registry.next_order();
        registry.by_kind.entry(kind).or_default().push(Registered {
            order,
            handler: erase(handler),
        });
        tracing::debug!(event = %kind, "Handler registered");
    }

    /// Register a handler for every event
    pub fn register_any<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut registry = self.registry.write();
        let order = registry.next_order();
        registry.any.push(Registered {
            order,
            handler: erase(handler),
        });
        tracing::debug!("Catch-all handler registered");
    }

    /// Number of handlers that would see an event of `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let registry = self.registry.read();
        registry.by_kind.get(&kind).map_or(0, Vec::len) + registry.any.len()
    }

    /// Deliver one event to its handlers
    ///
    /// Returns once every handler has finished. Handlers registered while a
    /// dispatch is running see the next event, not this one.
    pub async fn dispatch(&self, event: Arc<Event>) {
        let handlers = self.registry.read().handlers_for(event.kind);
        if handlers.is_empty() {
            tracing::trace!(event = %event.name, "No handlers");
            return;
        }

        for handler in handlers {
            let started =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler(Arc::clone(&event))));
            let result = match started {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            match result {
                Ok(Ok(())) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        shard_id = event.shard_id,
                        event = %event.name,
                        seq = ?event.seq,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(panic) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        shard_id = event.shard_id,
                        event = %event.name,
                        seq = ?event.seq,
                        panic = panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
    }

    /// Successful handler invocations so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Handler invocations that returned an error or panicked
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("EventDispatcher")
            .field("kinds", &registry.by_kind.len())
            .field("any", &registry.any.len())
            .field("delivered", &self.delivered())
            .field("failures", &self.failures())
            .finish()
    }
}

fn erase<F, Fut>(handler: F) -> Handler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| handler(event).boxed())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
