//! In-memory pub/sub for single-node deployments and tests.
//!
//! A [`MemoryBroker`] stands in for an external broker. Every
//! [`MemoryTransport`] connected to the same broker behaves like a
//! separate process attached to the same Redis instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tablehub_core::error::AppError;
use tablehub_core::result::AppResult;

use super::transport::{InboundFrame, PubSubTransport};

/// Shared in-process broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<InboundFrame>,
}

impl MemoryBroker {
    /// Create a broker that buffers up to `capacity` undelivered messages
    /// per attached transport.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attach a new transport, returning it with its inbound receiver.
    pub fn connect(&self, buffer: usize) -> (MemoryTransport, mpsc::Receiver<InboundFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer.max(1));
        let topics = Arc::new(DashSet::new());
        let cancel = CancellationToken::new();

        tokio::spawn(forward(
            self.tx.subscribe(),
            inbound_tx,
            topics.clone(),
            cancel.clone(),
        ));

        let transport = MemoryTransport {
            tx: self.tx.clone(),
            topics,
            cancel,
            closed: AtomicBool::new(false),
        };
        (transport, inbound_rx)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One node's attachment to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryTransport {
    tx: broadcast::Sender<InboundFrame>,
    topics: Arc<DashSet<String>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::broker("memory transport is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn publish(&self, batch: Vec<(String, String)>) -> AppResult<()> {
        self.ensure_open()?;
        for (topic, payload) in batch {
            // No receivers simply means no node is listening.
            let _ = self.tx.send(InboundFrame { topic, payload });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<()> {
        self.ensure_open()?;
        self.topics.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> AppResult<()> {
        self.ensure_open()?;
        self.topics.remove(topic);
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        self.ensure_open()
    }

    async fn close(&self) -> AppResult<()> {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
        Ok(())
    }
}

async fn forward(
    mut rx: broadcast::Receiver<InboundFrame>,
    inbound: mpsc::Sender<InboundFrame>,
    topics: Arc<DashSet<String>>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Memory broker subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if !topics.contains(&frame.topic) {
            continue;
        }
        if inbound.send(frame).await.is_err() {
            break;
        }
    }
    debug!("Memory transport forwarder stopped");
}
