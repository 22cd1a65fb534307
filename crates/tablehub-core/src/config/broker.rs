//! Pub/sub broker configuration for multi-node fan-out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cross-process broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Whether broadcasts are relayed through a broker at all.
    #[serde(default)]
    pub enabled: bool,
    /// Broker provider: `"redis"` or `"memory"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Redis connection URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Prefix for every broker topic.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Identity of this process. A random id is generated when unset.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Capacity of the inbound frame queue between transport and dispatcher.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
    /// Subscriber reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            url: default_url(),
            channel_prefix: default_channel_prefix(),
            node_id: None,
            inbound_buffer: default_inbound_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff applied when the subscriber connection drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Upper bound on the retry delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl ReconnectConfig {
    /// First retry delay.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Retry delay ceiling.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_channel_prefix() -> String {
    "tablehub:ws".to_string()
}

fn default_inbound_buffer() -> usize {
    1024
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}
