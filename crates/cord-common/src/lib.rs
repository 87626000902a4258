//! # cord-common
//!
//! Shared utilities including configuration, error handling, backoff, and telemetry.

pub mod backoff;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use backoff::{random_between, Backoff};
pub use config::{
    CacheConfig, ClientConfig, ClientSettings, ConfigError, GatewayConfig, HttpConfig,
    ShardConfig,
};
pub use error::{ApiErrorBody, ClientError, ClientResult, ErrorKind};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
