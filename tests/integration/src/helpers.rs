//! Test helpers for integration tests
//!
//! Provides a scripted REST transport, a client harness wired to the
//! in-memory gateway, and small waiting utilities.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use cord_client::{Client, ClientConfig};
use cord_http::{HttpRequest, HttpResponse, Method, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub use cord_gateway::connection::testing::{MockConnector, Sent, ServerSide};

/// API base every test client uses
pub const API_URL: &str = "https://api.test/v10";

/// Gateway base every test client uses
pub const GATEWAY_URL: &str = "wss://gateway.test";

/// A request as seen by the transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub at: Instant,
}

/// Replays queued responses per path and records every request
///
/// Paths with nothing queued answer `200 {}`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>>,
    log: Mutex<Vec<RecordedRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response for `path` (expanded, without the API base)
    pub fn push(&self, path: &str, response: HttpResponse) {
        self.push_result(path, Ok(response));
    }

    pub fn push_result(&self, path: &str, response: Result<HttpResponse, TransportError>) {
        self.queues
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Delay every response
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request.url.trim_start_matches(API_URL).to_string();
        self.log.lock().push(RecordedRequest {
            method: request.method,
            path: path.clone(),
            body: request.body,
            at: Instant::now(),
        });

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.queues
            .lock()
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(HttpResponse::json(200, &json!({}))))
    }
}

/// Configuration with short timings suitable for tests
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("test-token");
    config.client.api_url = API_URL.to_string();
    config.client.gateway_url = Some(GATEWAY_URL.to_string());
    config.client.shard_count = Some(1);
    config.gateway.reconnect_base_ms = 1;
    config.gateway.reconnect_max_ms = 10;
    config.gateway.invalid_session_delay_min_ms = 0;
    config.gateway.invalid_session_delay_max_ms = 5;
    config.shards.identify_interval_ms = 10;
    config.shards.restart_base_ms = 1;
    config.shards.restart_max_ms = 10;
    config.http.retry_base_ms = 1;
    config.http.retry_max_ms = 10;
    config.http.global_requests_per_second = 1_000;
    config
}

/// A client wired to scripted network layers
pub struct TestClient {
    pub client: Client,
    pub http: Arc<ScriptedTransport>,
    pub gateway: Arc<MockConnector>,
}

impl TestClient {
    pub fn new() -> Result<Self> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let http = ScriptedTransport::new();
        let gateway = Arc::new(MockConnector::new());
        let client = Client::builder(config)
            .transport(http.clone())
            .connector(gateway.clone())
            .build()?;
        Ok(Self {
            client,
            http,
            gateway,
        })
    }

    /// Start the client and complete Hello/Identify/READY on shard 0
    pub async fn connect(&self, session_id: &str) -> Result<ServerSide> {
        self.client.start().await?;
        let mut server = self.gateway.accept().await;
        server.send(crate::fixtures::hello(45_000));
        server.expect_op(cord_gateway::OpCode::Identify).await;
        server.send(crate::fixtures::ready(session_id, 1));
        Ok(server)
    }

    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}

/// Await `future` for at most five seconds
pub async fn within<F: Future>(future: F) -> Result<F::Output> {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .context("timed out")
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) -> Result<()> {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
}
