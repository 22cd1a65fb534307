//! Realtime engine metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level metrics counters.
#[derive(Debug, Default)]
pub struct RealtimeMetrics {
    connections_opened: AtomicU64,
    connections_active: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    broadcasts: AtomicU64,
    stalled_evictions: AtomicU64,
    heartbeat_evictions: AtomicU64,
    broker_published: AtomicU64,
    broker_received: AtomicU64,
    broker_publish_errors: AtomicU64,
    broker_decode_errors: AtomicU64,
}

impl RealtimeMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection joined the hub.
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection left the hub.
    pub fn connection_closed(&self) {
        // Saturating: a double close must not wrap the gauge.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// An inbound frame was read.
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was written to a socket.
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A reply could not be enqueued.
    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A broadcast request was processed.
    pub fn broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections evicted because their queue was full or closed.
    pub fn stalled_evicted(&self, count: u64) {
        self.stalled_evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Connections evicted by the heartbeat sweep.
    pub fn heartbeat_evicted(&self, count: u64) {
        self.heartbeat_evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Broker messages published.
    pub fn broker_published(&self, count: u64) {
        self.broker_published.fetch_add(count, Ordering::Relaxed);
    }

    /// A broker message arrived.
    pub fn broker_received(&self) {
        self.broker_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A publish batch failed.
    pub fn broker_publish_failed(&self) {
        self.broker_publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// An inbound broker payload could not be decoded.
    pub fn broker_decode_failed(&self) {
        self.broker_decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            stalled_evictions: self.stalled_evictions.load(Ordering::Relaxed),
            heartbeat_evictions: self.heartbeat_evictions.load(Ordering::Relaxed),
            broker_published: self.broker_published.load(Ordering::Relaxed),
            broker_received: self.broker_received.load(Ordering::Relaxed),
            broker_publish_errors: self.broker_publish_errors.load(Ordering::Relaxed),
            broker_decode_errors: self.broker_decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Connections ever registered
    pub connections_opened: u64,
    /// Connections currently registered
    pub connections_active: u64,
    /// Inbound frames read
    pub messages_received: u64,
    /// Frames written to sockets
    pub messages_sent: u64,
    /// Replies dropped on a full queue
    pub messages_dropped: u64,
    /// Broadcast requests processed
    pub broadcasts: u64,
    /// Evictions of stalled consumers
    pub stalled_evictions: u64,
    /// Evictions by heartbeat sweep
    pub heartbeat_evictions: u64,
    /// Broker messages published
    pub broker_published: u64,
    /// Broker messages received
    pub broker_received: u64,
    /// Failed publish batches
    pub broker_publish_errors: u64,
    /// Undecodable broker payloads
    pub broker_decode_errors: u64,
}
