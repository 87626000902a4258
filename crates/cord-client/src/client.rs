//! Client context
//!
//! Builds the runtime in dependency order (config, rate limiter, cache, REST
//! dispatcher, event dispatcher, shard coordinator) and tears it down in
//! reverse: shards first, then in-flight REST calls.

use cord_cache::ObjectCache;
use cord_common::{ClientConfig, ClientResult};
use cord_core::{Channel, Guild, Member, Message, Snowflake, User};
use cord_gateway::{
    Connector, Event, EventDispatcher, EventKind, ShardCoordinator, ShardInfo,
    TungsteniteConnector, UpdatePresence,
};
use cord_http::{CreateMessage, HttpClient, RateLimiter, Transport};
use std::future::Future;
use std::sync::Arc;

/// Builder for [`Client`] with replaceable network layers
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    connector: Option<Arc<dyn Connector>>,
    presence: Option<UpdatePresence>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            connector: None,
            presence: None,
        }
    }

    /// HTTP transport; reqwest when unset
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Gateway connector; TLS WebSockets when unset
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Build the Client
    ///
    /// # Errors
    /// Returns `ClientError::Config` if the configuration is invalid or the
    /// HTTP transport cannot be created
    pub fn build(self) -> ClientResult<Client> {
        let config = self.config;
        config.validate()?;

        let limiter = Arc::new(RateLimiter::new(config.http.global_requests_per_second));
        let cache = Arc::new(ObjectCache::new(config.cache.max_messages));
        let http = match self.transport {
            Some(transport) => HttpClient::new(&config, transport, limiter, Arc::clone(&cache)),
            None => HttpClient::from_config(&config, limiter, Arc::clone(&cache))?,
        };
        let dispatcher = Arc::new(EventDispatcher::new());

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector) as Arc<dyn Connector>);
        let mut shards =
            ShardCoordinator::new(&config, connector, Arc::clone(&cache), Arc::clone(&dispatcher));
        if let Some(presence) = self.presence {
            shards = shards.with_presence(presence);
        }

        tracing::debug!(
            api_url = %config.client.api_url,
            max_messages = config.cache.max_messages,
            "Client built"
        );

        Ok(Client {
            config: Arc::new(config),
            cache,
            http: Arc::new(http),
            dispatcher,
            shards: Arc::new(shards),
        })
    }
}

/// Chat platform client
///
/// Cheap to clone; clones share the same shards, cache and limiter.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    cache: Arc<ObjectCache>,
    http: Arc<HttpClient>,
    dispatcher: Arc<EventDispatcher>,
    shards: Arc<ShardCoordinator>,
}

impl Client {
    /// Create a client with the default network layers
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    // === Events ===

    /// Register a handler for one event kind
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.register(kind, handler);
    }

    /// Register a handler for every event
    pub fn on_any<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.register_any(handler);
    }

    // === Lifecycle ===

    /// Connect every shard
    ///
    /// The gateway URL, shard count and identify concurrency come from
    /// `GET /gateway/bot` unless the URL and shard count are both configured.
    pub async fn start(&self) -> ClientResult<()> {
        let settings = &self.config.client;
        if let (Some(url), Some(shards)) = (&settings.gateway_url, settings.shard_count) {
            return self
                .shards
                .start_with(url, shards, self.config.shards.max_concurrency);
        }

        let info = self.http.get_gateway_bot().await?;
        let limit = info.session_start_limit;
        tracing::info!(
            url = %info.url,
            recommended_shards = info.shards,
            session_starts_remaining = limit.remaining,
            max_concurrency = limit.max_concurrency,
            "Gateway discovered"
        );
        if limit.remaining == 0 {
            tracing::warn!(
                reset_after_ms = limit.reset_after,
                "No session starts left; identifies will be rejected until the limit resets"
            );
        }

        let url = settings.gateway_url.clone().unwrap_or(info.url);
        let shards = settings.shard_count.unwrap_or(info.shards).max(1);
        self.shards
            .start_with(&url, shards, limit.max_concurrency.max(1))
    }

    pub fn shard_status(&self, index: u32) -> Option<ShardInfo> {
        self.shards.shard_status(index)
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.shard_count()
    }

    /// Wait for the first fatal error, or `Ok` once shut down
    pub async fn wait(&self) -> ClientResult<()> {
        self.shards.wait().await
    }

    /// Stop every shard, then drain in-flight REST calls
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down client");
        self.shards.shutdown().await;
        self.http.shutdown().await;
        tracing::info!("Client shut down");
    }

    // === Cached-or-fetched reads ===

    pub async fn fetch_user(&self, user_id: Snowflake) -> ClientResult<User> {
        match self.cache.user(user_id) {
            Some(user) => Ok(user),
            None => self.http.get_user(user_id).await,
        }
    }

    pub async fn fetch_channel(&self, channel_id: Snowflake) -> ClientResult<Channel> {
        match self.cache.channel(channel_id) {
            Some(channel) => Ok(channel),
            None => self.http.get_channel(channel_id).await,
        }
    }

    /// Cached guild, unless only the READY placeholder is known
    pub async fn fetch_guild(&self, guild_id: Snowflake) -> ClientResult<Guild> {
        match self.cache.guild(guild_id) {
            Some(guild) if !guild.unavailable => Ok(guild),
            _ => self.http.get_guild(guild_id).await,
        }
    }

    pub async fn fetch_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> ClientResult<Member> {
        match self.cache.member(guild_id, user_id) {
            Some(member) => Ok(member),
            None => self.http.get_member(guild_id, user_id).await,
        }
    }

    pub async fn fetch_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> ClientResult<Message> {
        match self.cache.message(message_id) {
            Some(message) if message.channel_id == channel_id => Ok(message),
            _ => self.http.get_message(channel_id, message_id).await,
        }
    }

    // === Messages ===

    pub async fn send_message(
        &self,
        channel_id: Snowflake,
        content: impl Into<String>,
    ) -> ClientResult<Message> {
        self.http
            .create_message(channel_id, &CreateMessage::new(content))
            .await
    }

    /// Send a fully specified message (replies, TTS)
    pub async fn send(
        &self,
        channel_id: Snowflake,
        message: &CreateMessage,
    ) -> ClientResult<Message> {
        self.http.create_message(channel_id, message).await
    }

    pub async fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        content: impl Into<String>,
    ) -> ClientResult<Message> {
        self.http.edit_message(channel_id, message_id, content).await
    }

    pub async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> ClientResult<()> {
        self.http.delete_message(channel_id, message_id).await
    }

    /// Up to `limit` messages older than `before`, newest first
    pub async fn message_history(
        &self,
        channel_id: Snowflake,
        limit: usize,
        before: Option<Snowflake>,
    ) -> ClientResult<Vec<Message>> {
        self.http.message_history(channel_id, limit, before).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("api_url", &self.config.client.api_url)
            .field("shards", &self.shards)
            .field("http", &self.http)
            .finish()
    }
}
