// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Ferry sync layer.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Ferry configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    /// Client identity and logging.
    #[serde(default)]
    pub client: ClientConfig,

    /// Durable storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP and connectivity settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Offline queue and retry policy.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Credential refresh settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Server event channel settings.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Reconciliation cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Client identity and logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// User-Agent header sent with every HTTP request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user_agent() -> String {
    concat!("ferry/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Keep everything in memory (tests, ephemeral sessions).
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            in_memory: false,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("ferry").join("ferry.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("ferry.db"))
        .to_string_lossy()
        .into_owned()
}

/// HTTP and connectivity configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Base URL that relative action endpoints are resolved against.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connectivity readings must be stable this long before an edge is emitted.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_debounce_ms() -> u64 {
    500
}

/// Where a transiently failed action waits for its next attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOrdering {
    /// Retry the head in place; later actions wait until it is terminal.
    #[default]
    Strict,
    /// Move the failed head to the tail so later actions can proceed.
    Rotate,
}

/// Offline queue and retry policy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Transient failures tolerated before an action is surfaced as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum number of pending actions; the oldest is dropped on overflow.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Backoff before the first retry, doubled for each further retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on the retry backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub retry_ordering: RetryOrdering,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            capacity: default_capacity(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_ordering: RetryOrdering::default(),
        }
    }
}

impl QueueConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_capacity() -> usize {
    500
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Credential refresh configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Refresh proactively when less than this much validity remains.
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,

    /// Refresh endpoint, relative to `network.api_base_url` or absolute.
    #[serde(default = "default_refresh_url")]
    pub refresh_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: default_refresh_threshold_secs(),
            refresh_url: default_refresh_url(),
        }
    }
}

impl AuthConfig {
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }
}

fn default_refresh_threshold_secs() -> u64 {
    300
}

fn default_refresh_url() -> String {
    "/auth/refresh".to_string()
}

/// Server event channel configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// WebSocket endpoint. `None` disables the event channel.
    #[serde(default)]
    pub url: Option<String>,

    /// Reconnect attempts before the channel gives up.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,

    /// Delay before the first reconnect attempt, doubled for each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the reconnect delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Topics joined as soon as the channel connects.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Server event names whose payloads are applied to the cache.
    #[serde(default = "default_push_events")]
    pub push_events: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_reconnects: default_max_reconnects(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            topics: Vec::new(),
            push_events: default_push_events(),
        }
    }
}

impl ChannelConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_max_reconnects() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_push_events() -> Vec<String> {
    vec!["message:new".to_string(), "job:updated".to_string()]
}

/// Reconciliation cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Pending records older than this are reported as unconfirmed after restart.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
        }
    }
}

impl CacheConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

fn default_staleness_secs() -> u64 {
    600
}
