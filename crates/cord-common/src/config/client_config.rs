//! Client configuration structs
//!
//! Loads configuration from environment variables or a config file.

use cord_core::Intents;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub shards: ShardConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Credentials and endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Gateway URL override; discovered through the API when unset
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub intents: Intents,
    /// Shard count override; the recommended count is used when unset
    #[serde(default)]
    pub shard_count: Option<u32>,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u8,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Gateway session policy
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    /// Unacknowledged heartbeats tolerated before the connection is considered zombied
    #[serde(default = "default_missed_ack_limit")]
    pub missed_ack_limit: u32,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Connected time after which the reconnect backoff resets
    #[serde(default = "default_stable_connection_ms")]
    pub stable_connection_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_max_invalid_sessions")]
    pub max_invalid_sessions: u32,
    #[serde(default = "default_max_protocol_violations")]
    pub max_protocol_violations: u32,
    #[serde(default = "default_invalid_session_delay_min_ms")]
    pub invalid_session_delay_min_ms: u64,
    #[serde(default = "default_invalid_session_delay_max_ms")]
    pub invalid_session_delay_max_ms: u64,
}

/// Shard coordination policy
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    #[serde(default = "default_identify_interval_ms")]
    pub identify_interval_ms: u64,
    /// Identify tokens released per interval
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default = "default_max_shard_restarts")]
    pub max_shard_restarts: u32,
    #[serde(default = "default_restart_base_ms")]
    pub restart_base_ms: u64,
    #[serde(default = "default_restart_max_ms")]
    pub restart_max_ms: u64,
}

/// REST dispatcher policy
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Object cache limits
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Messages kept per client; 0 disables message caching
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

// Default value functions
fn default_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_large_threshold() -> u8 {
    50
}

fn default_user_agent() -> String {
    format!("DiscordBot (https://github.com/cord-rs/cord, {})", env!("CARGO_PKG_VERSION"))
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_missed_ack_limit() -> u32 {
    2
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_stable_connection_ms() -> u64 {
    60_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_max_invalid_sessions() -> u32 {
    5
}

fn default_max_protocol_violations() -> u32 {
    3
}

fn default_invalid_session_delay_min_ms() -> u64 {
    1_000
}

fn default_invalid_session_delay_max_ms() -> u64 {
    5_000
}

fn default_identify_interval_ms() -> u64 {
    5_000
}

fn default_max_concurrency() -> u32 {
    1
}

fn default_max_shard_restarts() -> u32 {
    5
}

fn default_restart_base_ms() -> u64 {
    5_000
}

fn default_restart_max_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_max_rate_limit_retries() -> u32 {
    5
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_global_requests_per_second() -> u32 {
    50
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_max_messages() -> usize {
    1_000
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
            gateway_url: None,
            intents: Intents::default(),
            shard_count: None,
            large_threshold: default_large_threshold(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hello_timeout_ms: default_hello_timeout_ms(),
            missed_ack_limit: default_missed_ack_limit(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            stable_connection_ms: default_stable_connection_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_invalid_sessions: default_max_invalid_sessions(),
            max_protocol_violations: default_max_protocol_violations(),
            invalid_session_delay_min_ms: default_invalid_session_delay_min_ms(),
            invalid_session_delay_max_ms: default_invalid_session_delay_max_ms(),
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            identify_interval_ms: default_identify_interval_ms(),
            max_concurrency: default_max_concurrency(),
            max_shard_restarts: default_max_shard_restarts(),
            restart_base_ms: default_restart_base_ms(),
            restart_max_ms: default_restart_max_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_transient_retries: default_max_transient_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            global_requests_per_second: default_global_requests_per_second(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    #[must_use]
    pub fn stable_connection(&self) -> Duration {
        Duration::from_millis(self.stable_connection_ms)
    }
}

impl ShardConfig {
    #[must_use]
    pub fn identify_interval(&self) -> Duration {
        Duration::from_millis(self.identify_interval_ms)
    }
}

impl HttpConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ClientConfig {
    /// Default configuration for a bot token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.client.token = token.into();
        config
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CORD_TOKEN` is missing or a variable does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let mut config = Self::new(
            env::var("CORD_TOKEN").map_err(|_| ConfigError::MissingVar("CORD_TOKEN"))?,
        );

        let client = &mut config.client;
        if let Ok(url) = env::var("CORD_API_URL") {
            client.api_url = url;
        }
        client.gateway_url = env::var("CORD_GATEWAY_URL").ok();
        if let Some(bits) = parse_var::<u64>("CORD_INTENTS")? {
            client.intents = Intents::from_bits_truncate(bits);
        }
        client.shard_count = parse_var("CORD_SHARD_COUNT")?;
        set_var(&mut client.large_threshold, "CORD_LARGE_THRESHOLD")?;

        let gateway = &mut config.gateway;
        set_var(&mut gateway.hello_timeout_ms, "CORD_HELLO_TIMEOUT_MS")?;
        set_var(&mut gateway.missed_ack_limit, "CORD_MISSED_ACK_LIMIT")?;
        set_var(&mut gateway.reconnect_base_ms, "CORD_RECONNECT_BASE_MS")?;
        set_var(&mut gateway.reconnect_max_ms, "CORD_RECONNECT_MAX_MS")?;
        set_var(&mut gateway.stable_connection_ms, "CORD_STABLE_CONNECTION_MS")?;
        set_var(&mut gateway.max_reconnect_attempts, "CORD_MAX_RECONNECT_ATTEMPTS")?;
        set_var(&mut gateway.max_invalid_sessions, "CORD_MAX_INVALID_SESSIONS")?;
        set_var(&mut gateway.max_protocol_violations, "CORD_MAX_PROTOCOL_VIOLATIONS")?;

        let shards = &mut config.shards;
        set_var(&mut shards.identify_interval_ms, "CORD_IDENTIFY_INTERVAL_MS")?;
        set_var(&mut shards.max_concurrency, "CORD_MAX_CONCURRENCY")?;
        set_var(&mut shards.max_shard_restarts, "CORD_MAX_SHARD_RESTARTS")?;

        let http = &mut config.http;
        set_var(&mut http.max_rate_limit_retries, "CORD_MAX_RATE_LIMIT_RETRIES")?;
        set_var(&mut http.max_transient_retries, "CORD_MAX_TRANSIENT_RETRIES")?;
        set_var(&mut http.retry_base_ms, "CORD_RETRY_BASE_MS")?;
        set_var(&mut http.retry_max_ms, "CORD_RETRY_MAX_MS")?;
        set_var(&mut http.global_requests_per_second, "CORD_GLOBAL_REQUESTS_PER_SECOND")?;
        set_var(&mut http.request_timeout_ms, "CORD_REQUEST_TIMEOUT_MS")?;

        set_var(&mut config.cache.max_messages, "CORD_MAX_MESSAGES")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, overlaid with `CORD_<SECTION>__<KEY>` variables
    ///
    /// The format is picked from the file extension (toml, yaml, json, ...).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config: Self = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("CORD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(source, ::config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.token.trim().is_empty() {
            return Err(ConfigError::MissingVar("token"));
        }
        if self.client.shard_count == Some(0) {
            return Err(ConfigError::InvalidValue("shard_count", "must be at least 1".into()));
        }
        if self.gateway.missed_ack_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "missed_ack_limit",
                "must be at least 1".into(),
            ));
        }
        if self.gateway.invalid_session_delay_min_ms > self.gateway.invalid_session_delay_max_ms {
            return Err(ConfigError::InvalidValue(
                "invalid_session_delay_min_ms",
                "must not exceed invalid_session_delay_max_ms".into(),
            ));
        }
        if self.shards.identify_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "identify_interval_ms",
                "must be greater than 0".into(),
            ));
        }
        if self.shards.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue("max_concurrency", "must be at least 1".into()));
        }
        if self.http.global_requests_per_second == 0 {
            return Err(ConfigError::InvalidValue(
                "global_requests_per_second",
                "must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

fn set_var<T: FromStr>(slot: &mut T, name: &'static str) -> Result<(), ConfigError> {
    if let Some(value) = parse_var(name)? {
        *slot = value;
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}
