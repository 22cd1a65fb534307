//! Real-time WebSocket engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Real-time (WebSocket) engine configuration.
///
/// Keep-alive timings must satisfy `ping_period < pong_wait <= heartbeat_timeout`,
/// where the ping period is derived as nine tenths of `pong_wait_seconds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Capacity of each connection's outbound message queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Capacity of each of the hub's request queues.
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,
    /// Read deadline in seconds, renewed on every received pong.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_seconds: u64,
    /// Deadline for writing a single frame, in seconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_seconds: u64,
    /// Interval between heartbeat sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Connections silent for longer than this are evicted by the sweep.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Maximum size of any inbound frame.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Maximum size of ping/pong/subscribe/unsubscribe frames.
    #[serde(default = "default_max_control_message_bytes")]
    pub max_control_message_bytes: usize,
    /// Presence entries older than this are dropped.
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl_seconds: u64,
    /// Interval between presence cleanup passes.
    #[serde(default = "default_presence_cleanup_interval")]
    pub presence_cleanup_interval_seconds: u64,
}

impl RealtimeConfig {
    /// Read deadline for a connection.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    /// Protocol ping cadence, nine tenths of the read deadline.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    /// Per-frame write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    /// Heartbeat sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Heartbeat eviction threshold.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Presence entry lifetime.
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_seconds)
    }

    /// Presence cleanup cadence.
    pub fn presence_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.presence_cleanup_interval_seconds)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
            pong_wait_seconds: default_pong_wait(),
            write_wait_seconds: default_write_wait(),
            sweep_interval_seconds: default_sweep_interval(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            max_message_bytes: default_max_message_bytes(),
            max_control_message_bytes: default_max_control_message_bytes(),
            presence_ttl_seconds: default_presence_ttl(),
            presence_cleanup_interval_seconds: default_presence_cleanup_interval(),
        }
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_hub_queue_capacity() -> usize {
    1024
}

fn default_pong_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_max_message_bytes() -> usize {
    65_536
}

fn default_max_control_message_bytes() -> usize {
    512
}

fn default_presence_ttl() -> u64 {
    300
}

fn default_presence_cleanup_interval() -> u64 {
    60
}
