//! Settings sections.
//!
//! Every struct uses `#[serde(default)]` so a partial JSON file only needs
//! the keys it changes.

use herald_core::{LogFormat, RetryConfig};
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Heartbeat probing.
    pub liveness: LivenessSettings,
    /// Cross-process fan-out.
    pub relay: RelaySettings,
    /// Identity store connection.
    pub database: DatabaseSettings,
    /// Key/value cache.
    pub cache: CacheSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Outbound frames buffered per connection before frames are dropped.
    pub send_queue_capacity: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Grace period for in-flight work on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Liveness monitor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Seconds between probe cycles.
    pub probe_interval_secs: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
        }
    }
}

/// Relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Shared broadcast channel name.
    pub channel: String,
    /// Redis URL. When unset the relay runs on an in-process channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// Messages buffered between `publish` and the publisher task.
    pub outbox_capacity: usize,
    /// Retry policy for a single publish.
    pub publish_retry: RetryConfig,
    /// Backoff between resubscription attempts.
    pub resubscribe: RetryConfig,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel: "notification-channel".to_string(),
            redis_url: None,
            outbox_capacity: 1024,
            publish_retry: RetryConfig::default(),
            resubscribe: RetryConfig {
                max_attempts: 0,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                jitter_factor: 0.2,
            },
        }
    }
}

/// Identity store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Postgres URL. When unset the gateway uses an in-memory store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Connections kept open while idle.
    pub pool_size: u32,
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
            max_connections: 50,
            acquire_timeout_secs: 5,
        }
    }
}

/// Cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Cache identity lookups.
    pub enabled: bool,
    /// TTL applied when a caller does not pass one.
    pub default_ttl_secs: u64,
    /// TTL for cached user records.
    pub user_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 3600,
            user_ttl_secs: 300,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
