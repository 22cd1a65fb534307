//! Broker bridge: callbacks over a pub/sub transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tablehub_core::error::AppError;
use tablehub_core::result::AppResult;

use crate::metrics::RealtimeMetrics;

use super::transport::{InboundFrame, PubSubTransport};

/// Kind carried by every data fan-out message.
pub const BROKER_MESSAGE_KIND: &str = "message";

/// Envelope published on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Always `"message"` for data fan-out.
    #[serde(rename = "type")]
    pub kind: String,
    /// Broker topic.
    pub channel: String,
    /// Opaque payload.
    pub data: Value,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// Node that published the message.
    #[serde(default)]
    pub source: String,
}

/// Callback invoked for every message on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(BrokerMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Transport health as seen by the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerHealth {
    /// Whether the broker answered a ping.
    pub healthy: bool,
    /// Whether [`BrokerBridge::close`] has been called.
    pub closing: bool,
    /// Topics with at least one local callback.
    pub subscribed_channels: usize,
    /// Last ping error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Publishes to and receives from an external broker on behalf of this node.
pub struct BrokerBridge {
    transport: Arc<dyn PubSubTransport>,
    handlers: Arc<DashMap<String, Vec<MessageHandler>>>,
    /// Held across broker-level subscribe and unsubscribe calls
    membership: Mutex<()>,
    source: String,
    closing: AtomicBool,
    metrics: Arc<RealtimeMetrics>,
    dispatch: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BrokerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBridge")
            .field("transport", &self.transport)
            .field("source", &self.source)
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .finish()
    }
}

impl BrokerBridge {
    /// Creates the bridge and starts its inbound dispatch loop.
    ///
    /// `source` identifies this node in every published message.
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        inbound: mpsc::Receiver<InboundFrame>,
        source: impl Into<String>,
        metrics: Arc<RealtimeMetrics>,
    ) -> Self {
        let handlers = Arc::new(DashMap::new());
        let task = tokio::spawn(dispatch_loop(inbound, handlers.clone(), metrics.clone()));

        Self {
            transport,
            handlers,
            membership: Mutex::new(()),
            source: source.into(),
            closing: AtomicBool::new(false),
            metrics,
            dispatch: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Identity of this node.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publishes `data` on every channel as one batch.
    ///
    /// Failures are returned to the caller and never retried here.
    pub async fn publish(&self, channels: &[String], data: Value) -> AppResult<()> {
        self.ensure_open()?;
        if channels.is_empty() {
            return Ok(());
        }

        let timestamp = Utc::now();
        let mut batch = Vec::with_capacity(channels.len());
        for channel in channels {
            let envelope = BrokerMessage {
                kind: BROKER_MESSAGE_KIND.to_string(),
                channel: channel.clone(),
                data: data.clone(),
                timestamp,
                source: self.source.clone(),
            };
            batch.push((channel.clone(), serde_json::to_string(&envelope)?));
        }

        let count = batch.len() as u64;
        match self.transport.publish(batch).await {
            Ok(()) => {
                self.metrics.broker_published(count);
                Ok(())
            }
            Err(e) => {
                self.metrics.broker_publish_failed();
                error!(channels = ?channels, error = %e, "Broker publish failed");
                Err(e)
            }
        }
    }

    /// Registers a callback for a channel, subscribing at the broker on the
    /// first callback.
    ///
    /// A callback is only stored once the broker subscription exists, so a
    /// failed broker subscribe leaves earlier callbacks untouched.
    pub async fn subscribe(&self, channel: &str, handler: MessageHandler) -> AppResult<()> {
        self.ensure_open()?;
        let _membership = self.membership.lock().await;

        if let Some(mut entry) = self.handlers.get_mut(channel) {
            entry.push(handler);
            return Ok(());
        }

        self.transport.subscribe(channel).await?;
        self.handlers
            .entry(channel.to_string())
            .or_default()
            .push(handler);
        info!(channel = %channel, "Broker channel subscribed");
        Ok(())
    }

    /// Drops every callback for a channel and cancels the broker subscription.
    pub async fn unsubscribe(&self, channel: &str) -> AppResult<()> {
        self.ensure_open()?;
        let _membership = self.membership.lock().await;

        if self.handlers.remove(channel).is_some() {
            self.transport.unsubscribe(channel).await?;
            info!(channel = %channel, "Broker channel unsubscribed");
        }
        Ok(())
    }

    /// Channels with local callbacks.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        channels.sort();
        channels
    }

    /// Whether the bridge is shutting down.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Pings the broker.
    pub async fn health(&self) -> BrokerHealth {
        let closing = self.is_closing();
        let result = if closing {
            Err(AppError::broker("bridge is closing"))
        } else {
            self.transport.ping().await
        };
        BrokerHealth {
            healthy: result.is_ok(),
            closing,
            subscribed_channels: self.handlers.len(),
            error: result.err().map(|e| e.message),
        }
    }

    /// Closes both broker connections and stops dispatch. Idempotent.
    pub async fn close(&self) -> AppResult<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.handlers.clear();
        let result = self.transport.close().await;
        let task = self.dispatch.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
        }
        info!(source = %self.source, "Broker bridge closed");
        result
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.is_closing() {
            return Err(AppError::broker("broker bridge is closing"));
        }
        Ok(())
    }
}

async fn dispatch_loop(
    mut inbound: mpsc::Receiver<InboundFrame>,
    handlers: Arc<DashMap<String, Vec<MessageHandler>>>,
    metrics: Arc<RealtimeMetrics>,
) {
    while let Some(frame) = inbound.recv().await {
        metrics.broker_received();

        let message: BrokerMessage = match serde_json::from_str(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                metrics.broker_decode_failed();
                warn!(topic = %frame.topic, error = %e, "Undecodable broker message skipped");
                continue;
            }
        };

        let callbacks = handlers
            .get(&message.channel)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        if callbacks.is_empty() {
            debug!(channel = %message.channel, "No handler for broker message");
            continue;
        }

        for callback in callbacks {
            tokio::spawn(callback(message.clone()));
        }
    }
    debug!("Broker dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::bridge::memory_pubsub::MemoryBroker;

    fn bridge(broker: &MemoryBroker, source: &str) -> BrokerBridge {
        let (transport, inbound) = broker.connect(64);
        BrokerBridge::new(
            Arc::new(transport),
            inbound,
            source,
            Arc::new(RealtimeMetrics::new()),
        )
    }

    fn collector() -> (MessageHandler, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |msg: BrokerMessage| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
            .boxed()
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_publish_reaches_remote_handler() {
        let broker = MemoryBroker::new(64);
        let a = bridge(&broker, "node-a");
        let b = bridge(&broker, "node-b");

        let (handler, mut rx) = collector();
        b.subscribe("topic", handler).await.unwrap();
        a.publish(&["topic".to_string()], json!({"k": 1}))
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind, "message");
        assert_eq!(msg.channel, "topic");
        assert_eq!(msg.source, "node-a");
        assert_eq!(msg.data, json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handlers() {
        let broker = MemoryBroker::new(64);
        let a = bridge(&broker, "node-a");
        let (handler, _rx) = collector();
        a.subscribe("topic", handler).await.unwrap();
        assert_eq!(a.subscribed_channels(), vec!["topic".to_string()]);

        a.unsubscribe("topic").await.unwrap();
        assert!(a.subscribed_channels().is_empty());
    }

    /// Fails the first broker subscribe after a short delay.
    #[derive(Debug, Default)]
    struct FlakySubscribe {
        attempts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PubSubTransport for FlakySubscribe {
        async fn publish(&self, _batch: Vec<(String, String)>) -> AppResult<()> {
            Ok(())
        }

        async fn subscribe(&self, _topic: &str) -> AppResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if attempt == 0 {
                Err(AppError::broker("subscribe refused"))
            } else {
                Ok(())
            }
        }

        async fn unsubscribe(&self, _topic: &str) -> AppResult<()> {
            Ok(())
        }

        async fn ping(&self) -> AppResult<()> {
            Ok(())
        }

        async fn close(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_subscribe_keeps_concurrent_callback() {
        let transport = Arc::new(FlakySubscribe::default());
        let (_tx, inbound) = mpsc::channel(8);
        let bridge = BrokerBridge::new(
            transport.clone(),
            inbound,
            "node-a",
            Arc::new(RealtimeMetrics::new()),
        );

        let (first, _rx1) = collector();
        let (second, _rx2) = collector();
        let (a, b) = tokio::join!(
            bridge.subscribe("topic", first),
            bridge.subscribe("topic", second)
        );

        assert!(a.is_err());
        assert!(b.is_ok());
        assert_eq!(bridge.subscribed_channels(), vec!["topic".to_string()]);
        assert_eq!(bridge.health().await.subscribed_channels, 1);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.handlers.get("topic").map(|h| h.len()), Some(1));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_fast() {
        let broker = MemoryBroker::new(64);
        let a = bridge(&broker, "node-a");
        a.close().await.unwrap();
        a.close().await.unwrap();

        let err = a.publish(&["t".to_string()], json!(null)).await.unwrap_err();
        assert!(err.message.contains("closing"));
        let (handler, _rx) = collector();
        assert!(a.subscribe("t", handler).await.is_err());
        assert!(!a.health().await.healthy);
    }
}
