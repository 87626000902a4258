//! Request dispatcher
//!
//! Every REST call goes through [`HttpClient::call`]: acquire a rate limit
//! permit, send, fold the response headers back into the limiter, then retry,
//! fail, or update the cache and return.

use crate::ratelimit::{RateLimitBody, RateLimitHeaders, RateLimiter};
use crate::routing::{ResponseKind, Route};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use cord_cache::ObjectCache;
use cord_common::{ApiErrorBody, Backoff, ClientConfig, ClientError, ClientResult, HttpConfig};
use cord_core::{
    Channel, GuildPayload, Member, MemberPayload, Message, MessagePayload, Role, Snowflake, User,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// REST client with rate limiting, retries and cache write-through
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ObjectCache>,
    config: HttpConfig,
    token: String,
    base_url: String,
    in_flight: AtomicUsize,
    drained: Notify,
    closed: AtomicBool,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Decrements the in-flight count when a call finishes, however it finishes
struct InFlight<'a>(&'a HttpClient);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl HttpClient {
    /// Create a client over an explicit transport
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ObjectCache>,
    ) -> Self {
        Self {
            transport,
            limiter,
            cache,
            config: config.http.clone(),
            token: config.client.token.clone(),
            base_url: config.client.api_url.trim_end_matches('/').to_string(),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a client that talks to the network through reqwest
    pub fn from_config(
        config: &ClientConfig,
        limiter: Arc<RateLimiter>,
        cache: Arc<ObjectCache>,
    ) -> ClientResult<Self> {
        let transport = ReqwestTransport::new(&config.client.user_agent, config.http.request_timeout())
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self::new(config, Arc::new(transport), limiter, cache))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Number of calls currently in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ClientResult<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(self);
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(guard)
    }

    /// Refuse new calls and wait for in-flight ones to finish
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let drained = self.drained.notified();
            if self.in_flight() == 0 {
                break;
            }
            drained.await;
        }
        tracing::debug!("HTTP client drained");
    }

    /// Perform a REST call
    ///
    /// 429 responses are retried after the limiter's wait and do not count as
    /// failures; after `max_rate_limit_retries` of them the call fails with
    /// `RateLimitExceeded`. 5xx responses and network errors are retried with
    /// backoff up to `max_transient_retries`, then fail with `Transient`. Any
    /// other non-success status fails immediately with `RequestRejected`.
    pub async fn call(&self, route: &Route, payload: Option<Value>) -> ClientResult<Value> {
        let _in_flight = self.enter()?;
        let backoff = Backoff::from_millis(self.config.retry_base_ms, self.config.retry_max_ms);
        let mut rate_limited: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            let permit = self.limiter.acquire(route).await;
            let request = self.build_request(route, payload.clone());

            let message = match self.transport.send(request).await {
                Ok(response) => {
                    let mut headers = RateLimitHeaders::parse(&response.headers);
                    if response.status == 429 {
                        if let Ok(body) = serde_json::from_slice::<RateLimitBody>(&response.body) {
                            headers.merge_body(&body);
                        }
                    }
                    self.limiter.complete(permit, route, response.status, &headers);

                    match response.status {
                        200..=299 => return self.finish(route, &response),
                        429 => {
                            rate_limited += 1;
                            tracing::warn!(
                                route = %route,
                                attempt = rate_limited,
                                global = headers.is_global(),
                                retry_after_ms = headers.retry_after.map(|d| d.as_millis() as u64),
                                "Rate limited"
                            );
                            if rate_limited > self.config.max_rate_limit_retries {
                                return Err(ClientError::RateLimitExceeded {
                                    route: route.to_string(),
                                    attempts: rate_limited,
                                    retry_after: headers.retry_after,
                                });
                            }
                            // The limiter holds the next acquire until the window reopens
                            continue;
                        }
                        status if status >= 500 => format!("server returned {status}"),
                        status => {
                            let body = ApiErrorBody::from_bytes(&response.body);
                            tracing::debug!(route = %route, status, error = %body, "Request rejected");
                            return Err(ClientError::RequestRejected { status, body });
                        }
                    }
                }
                Err(err) => {
                    drop(permit);
                    err.to_string()
                }
            };

            failures += 1;
            if failures > self.config.max_transient_retries {
                tracing::error!(route = %route, attempts = failures, error = %message, "Request failed");
                return Err(ClientError::Transient {
                    route: route.to_string(),
                    attempts: failures,
                    message,
                });
            }
            let delay = backoff.delay_for(failures - 1);
            tracing::warn!(
                route = %route,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// [`HttpClient::call`] with the response decoded into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        route: &Route,
        payload: Option<Value>,
    ) -> ClientResult<T> {
        let value = self.call(route, payload).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn build_request(&self, route: &Route, body: Option<Value>) -> HttpRequest {
        HttpRequest {
            method: route.method(),
            url: format!("{}{}", self.base_url, route.path()),
            query: route.query_pairs().to_vec(),
            headers: vec![("Authorization".to_string(), format!("Bot {}", self.token))],
            body,
        }
    }

    fn finish(&self, route: &Route, response: &HttpResponse) -> ClientResult<Value> {
        tracing::debug!(route = %route, status = response.status, "Request completed");

        let value = if response.status == 204 || response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body)?
        };

        if let Err(err) = self.cache_response(route, &value) {
            tracing::warn!(route = %route, error = %err, "Response did not match the expected shape");
        }
        Ok(value)
    }

    /// Write the entities in a successful response through to the cache
    fn cache_response(&self, route: &Route, value: &Value) -> ClientResult<()> {
        let guild_param = route
            .param_value("guild_id")
            .and_then(|id| Snowflake::parse(id).ok());

        match route.response_kind() {
            ResponseKind::Opaque => {}
            ResponseKind::User => {
                self.cache.upsert(decode::<User>(value)?);
            }
            ResponseKind::Guild => {
                self.cache
                    .upsert_guild(decode::<GuildPayload>(value)?.into_parts());
            }
            ResponseKind::Channel => {
                self.cache.upsert(decode::<Channel>(value)?);
            }
            ResponseKind::Channels => {
                let channels = decode::<Vec<Channel>>(value)?.into_iter().map(|mut channel| {
                    channel.guild_id = channel.guild_id.or(guild_param);
                    channel
                });
                self.cache.upsert_all(channels);
            }
            ResponseKind::Roles => {
                let roles = decode::<Vec<Role>>(value)?.into_iter().map(|mut role| {
                    if let Some(guild_id) = guild_param {
                        role.guild_id = guild_id;
                    }
                    role
                });
                self.cache.upsert_all(roles);
            }
            ResponseKind::Member => {
                let guild_id = guild_param.unwrap_or_default();
                let (member, user) = decode::<MemberPayload>(value)?.into_parts(guild_id);
                self.cache.upsert(user);
                self.cache.upsert(member);
            }
            ResponseKind::Message => {
                self.store_message(decode::<MessagePayload>(value)?);
            }
            ResponseKind::Messages => {
                for payload in decode::<Vec<MessagePayload>>(value)? {
                    self.store_message(payload);
                }
            }
            ResponseKind::DeletedMessage => {
                if let Some(id) = route
                    .param_value("message_id")
                    .and_then(|id| Snowflake::parse(id).ok())
                {
                    self.cache.remove_messages(&[id]);
                }
            }
        }
        Ok(())
    }

    /// Split a message payload, filling the guild from the cached channel when absent
    pub(crate) fn message_from(&self, payload: MessagePayload) -> (Message, Vec<User>) {
        let (mut message, users) = payload.into_parts();
        if message.guild_id.is_none() {
            message.guild_id = self
                .cache
                .channel(message.channel_id)
                .and_then(|channel| channel.guild_id);
        }
        (message, users)
    }

    fn store_message(&self, payload: MessagePayload) {
        let (message, users) = self.message_from(payload);
        self.cache.upsert_all(users);
        self.cache.upsert(message);
    }

    /// Decode a member response for `guild_id`
    pub(crate) fn member_from(&self, guild_id: Snowflake, value: Value) -> ClientResult<Member> {
        let payload: MemberPayload = serde_json::from_value(value)?;
        Ok(payload.into_parts(guild_id).0)
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> ClientResult<T> {
    Ok(T::deserialize(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use cord_cache::EntityKey;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays canned responses in order and records requests
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn push(&self, response: Result<HttpResponse, TransportError>) {
            self.responses.lock().push_back(response);
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::json(200, &json!({}))))
        }
    }

    fn client(transport: Arc<Scripted>) -> HttpClient {
        let mut config = ClientConfig::new("secret");
        config.http.retry_base_ms = 1;
        config.http.retry_max_ms = 5;
        HttpClient::new(
            &config,
            transport,
            Arc::new(RateLimiter::unthrottled()),
            Arc::new(ObjectCache::default()),
        )
    }

    fn user_route(id: u64) -> Route {
        Route::get("/users/{user_id}")
            .param("user_id", id)
            .returns(ResponseKind::User)
    }

    fn rate_limited(retry_after: f64) -> HttpResponse {
        HttpResponse::json(
            429,
            &json!({ "message": "You are being rate limited.", "retry_after": retry_after, "global": false }),
        )
    }

    #[tokio::test]
    async fn test_success_updates_cache_before_returning() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(HttpResponse::json(200, &json!({ "id": "42", "username": "ann" }))));
        let http = client(Arc::clone(&transport));

        http.call(&user_route(42), None).await.unwrap();

        let cached = http.cache().get(&EntityKey::User(Snowflake::new(42))).unwrap();
        assert_eq!(cached.as_user().unwrap().username, "ann");

        let request = &transport.requests.lock()[0];
        assert_eq!(request.url, "https://discord.com/api/v10/users/42");
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Bot secret".to_string())));
    }

    #[tokio::test]
    async fn test_client_error_carries_body() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(HttpResponse::json(
            404,
            &json!({ "message": "Unknown User", "code": 10013 }),
        )));
        let http = client(Arc::clone(&transport));

        let err = http.call(&user_route(1), None).await.unwrap_err();
        match err {
            ClientError::RequestRejected { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body.code, 10013);
                assert_eq!(body.message, "Unknown User");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_succeed() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(HttpResponse::json(502, &json!({}))));
        transport.push(Err(TransportError::Timeout));
        transport.push(Ok(HttpResponse::json(200, &json!({ "id": "7", "username": "bo" }))));
        let http = client(Arc::clone(&transport));

        let user: User = http.call_as(&user_route(7), None).await.unwrap();
        assert_eq!(user.username, "bo");
        assert_eq!(transport.requests.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_into_transient() {
        let transport = Arc::new(Scripted::default());
        for _ in 0..10 {
            transport.push(Ok(HttpResponse::json(500, &json!({}))));
        }
        let http = client(Arc::clone(&transport));

        let err = http.call(&user_route(7), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Transient { attempts: 4, .. }));
        // One try plus three retries
        assert_eq!(transport.requests.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_rate_limits_do_not_count_as_failures() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(rate_limited(0.01)));
        transport.push(Ok(HttpResponse::json(500, &json!({}))));
        transport.push(Ok(rate_limited(0.01)));
        transport.push(Ok(HttpResponse::json(500, &json!({}))));
        transport.push(Ok(rate_limited(0.01)));
        transport.push(Ok(HttpResponse::json(500, &json!({}))));
        transport.push(Ok(HttpResponse::json(200, &json!({ "id": "7", "username": "bo" }))));
        let http = client(Arc::clone(&transport));

        assert!(http.call(&user_route(7), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_bound_fails_call() {
        let transport = Arc::new(Scripted::default());
        for _ in 0..6 {
            transport.push(Ok(rate_limited(0.01)));
        }
        let http = client(Arc::clone(&transport));

        let err = http.call(&user_route(7), None).await.unwrap_err();
        assert!(matches!(err, ClientError::RateLimitExceeded { attempts: 6, .. }));
        assert_eq!(transport.requests.lock().len(), 6);
    }

    #[tokio::test]
    async fn test_delete_removes_cached_message() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(HttpResponse {
            status: 204,
            ..HttpResponse::default()
        }));
        let http = client(Arc::clone(&transport));
        http.cache()
            .upsert(Message::new(Snowflake::new(5), Snowflake::new(9), Snowflake::new(1), "bye"));

        http.delete_message(Snowflake::new(9), Snowflake::new(5))
            .await
            .unwrap();
        assert!(http.cache().message(Snowflake::new(5)).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_and_rejects_new_calls() {
        let transport = Arc::new(Scripted::default());
        transport.push(Ok(rate_limited(0.1)));
        let http = Arc::new(client(Arc::clone(&transport)));

        let call = {
            let http = Arc::clone(&http);
            tokio::spawn(async move { http.call(&user_route(3), None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(http.in_flight(), 1);

        http.shutdown().await;
        assert_eq!(http.in_flight(), 0);
        assert!(call.await.unwrap().is_ok());
        assert!(matches!(
            http.call(&user_route(3), None).await,
            Err(ClientError::Closed)
        ));
    }
}
