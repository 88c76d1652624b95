//! # Block Stream Configuration
//!
//! Endpoint, range and session parameters. Loaded from defaults, a TOML
//! document or `ZB_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::{ClientOptions, Credentials, GrpcWebClient};
use crate::algorithms::{RangeValidation, WireFormat};
use crate::domain::{
    Metadata, Network, ShieldedPool, StreamError, DEFAULT_BLOCK_BATCH_SIZE,
    DEFAULT_MAX_MESSAGE_BYTES,
};
use crate::ports::DEFAULT_EVENT_BUFFER;

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed.
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Block stream configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// lightwalletd gRPC-Web proxy URL.
    pub lightwalletd_url: String,

    /// Network served by the proxy.
    pub network: Network,

    /// Shielded pools the consumer scans.
    pub pool: ShieldedPool,

    /// Wire format.
    pub format: WireFormat,

    /// Range ordering check.
    pub validation: RangeValidation,

    /// Heights per sync batch.
    pub block_batch_size: u64,

    /// Concurrent streams for sharded fetches.
    pub shards: usize,

    /// Per-session deadline in seconds. `None` disables it.
    pub deadline_secs: Option<u64>,

    /// Stream re-opens per sync batch after a retryable failure.
    pub max_retries: u32,

    /// Backoff unit between re-opens (multiplied by the attempt number).
    pub retry_backoff_ms: u64,

    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Largest accepted message.
    pub max_message_bytes: usize,

    /// Events buffered per stream.
    pub channel_capacity: usize,

    /// Check compact record field widths on arrival.
    pub validate_blocks: bool,

    /// Bearer token sent as `authorization`.
    pub auth_token: Option<String>,

    /// Extra metadata headers sent with every call.
    pub metadata: Metadata,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            lightwalletd_url: "http://127.0.0.1:443".to_string(),
            network: Network::Mainnet,
            pool: ShieldedPool::Both,
            format: WireFormat::Text,
            validation: RangeValidation::Strict,
            block_batch_size: DEFAULT_BLOCK_BATCH_SIZE,
            shards: 1,
            deadline_secs: None,
            max_retries: 5,
            retry_backoff_ms: 500,
            connect_timeout_secs: 10,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            channel_capacity: DEFAULT_EVENT_BUFFER,
            validate_blocks: true,
            auth_token: None,
            metadata: Metadata::new(),
        }
    }
}

impl StreamConfig {
    /// Create a config for testing (small batches, fast retries).
    pub fn for_testing() -> Self {
        Self {
            network: Network::Testnet,
            block_batch_size: 10,
            deadline_secs: Some(5),
            max_retries: 3,
            retry_backoff_ms: 1,
            connect_timeout_secs: 1,
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ZB_LIGHTWALLETD_URL`: proxy URL
    /// - `ZB_NETWORK`: `mainnet` | `testnet`
    /// - `ZB_POOL`: `sapling` | `orchard` | `both`
    /// - `ZB_FORMAT`: `text` | `binary`
    /// - `ZB_BATCH_SIZE`: heights per sync batch
    /// - `ZB_SHARDS`: concurrent streams
    /// - `ZB_DEADLINE_SECS`: per-session deadline
    /// - `ZB_MAX_RETRIES`: re-opens per batch
    /// - `ZB_AUTH_TOKEN`: bearer token
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lightwalletd_url: env::var("ZB_LIGHTWALLETD_URL").unwrap_or(defaults.lightwalletd_url),
            network: env_parse("ZB_NETWORK").unwrap_or(defaults.network),
            pool: env_parse("ZB_POOL").unwrap_or(defaults.pool),
            format: env_parse("ZB_FORMAT").unwrap_or(defaults.format),
            block_batch_size: env_parse("ZB_BATCH_SIZE").unwrap_or(defaults.block_batch_size),
            shards: env_parse("ZB_SHARDS").unwrap_or(defaults.shards),
            deadline_secs: env_parse("ZB_DEADLINE_SECS").or(defaults.deadline_secs),
            max_retries: env_parse("ZB_MAX_RETRIES").unwrap_or(defaults.max_retries),
            auth_token: env::var("ZB_AUTH_TOKEN").ok().or(defaults.auth_token),
            ..defaults
        }
    }

    /// Session deadline, if configured.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Backoff before re-open number `attempt` (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Transport options for `GrpcWebClient`.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            format: self.format,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_message_bytes: self.max_message_bytes,
            channel_capacity: self.channel_capacity,
            validate_blocks: self.validate_blocks,
            ..Default::default()
        }
    }

    /// Credentials for the configured token and metadata. A token alone
    /// is sent as a bearer header; with metadata it joins the map as
    /// `authorization`.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.auth_token, self.metadata.is_empty()) {
            (None, true) => None,
            (Some(token), true) => Some(Credentials::Bearer(token.clone())),
            (token, false) => {
                let mut metadata = self.metadata.clone();
                if let Some(token) = token {
                    metadata.insert("authorization".to_string(), format!("Bearer {}", token));
                }
                Some(Credentials::Metadata(metadata))
            }
        }
    }

    /// gRPC-Web client for the configured endpoint, options and
    /// credentials.
    pub fn connect(&self) -> Result<GrpcWebClient, StreamError> {
        GrpcWebClient::new(&self.lightwalletd_url, self.credentials(), self.client_options())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "[zb-stream] ignoring unparsable setting");
            None
        }
    }
}
