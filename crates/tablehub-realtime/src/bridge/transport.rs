//! Broker transport abstraction.

use async_trait::async_trait;

use tablehub_core::result::AppResult;

/// A raw message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Broker topic the message arrived on.
    pub topic: String,
    /// Undecoded payload.
    pub payload: String,
}

/// Publish/subscribe operations against an external broker.
///
/// Implementations keep publishing and subscribing on separate
/// connections. Received messages are pushed into the bounded receiver
/// returned alongside the transport at connect time.
#[async_trait]
pub trait PubSubTransport: Send + Sync + std::fmt::Debug {
    /// Publishes every `(topic, payload)` pair as one batch.
    async fn publish(&self, batch: Vec<(String, String)>) -> AppResult<()>;

    /// Starts receiving messages for a topic.
    async fn subscribe(&self, topic: &str) -> AppResult<()>;

    /// Stops receiving messages for a topic.
    async fn unsubscribe(&self, topic: &str) -> AppResult<()>;

    /// Checks broker reachability.
    async fn ping(&self) -> AppResult<()>;

    /// Closes both connections. Calling it twice is harmless.
    async fn close(&self) -> AppResult<()>;
}
