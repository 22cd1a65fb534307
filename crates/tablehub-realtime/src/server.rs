//! Top-level real-time engine that ties together all subsystems.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use tablehub_core::config::{BrokerConfig, RealtimeConfig};
use tablehub_core::error::AppError;
use tablehub_core::result::AppResult;

use crate::bridge::{BrokerBridge, ClusterRelay, InboundFrame, MemoryBroker, PubSubTransport};
use crate::hub::Hub;
use crate::message::validator::FrameLimits;
use crate::metrics::RealtimeMetrics;
use crate::presence::PresenceTracker;
use crate::protocol::{DetachedDocumentService, Dispatcher, DocumentService};
use crate::service::{RealtimeService, RealtimeStats};

/// A connected broker transport handed to [`RealtimeEngine::assemble`].
#[derive(Debug)]
pub struct BrokerAttachment {
    /// Publish/subscribe transport.
    pub transport: Arc<dyn PubSubTransport>,
    /// Messages received by the transport.
    pub inbound: mpsc::Receiver<InboundFrame>,
    /// Identity of this node.
    pub node_id: String,
    /// Prefix for every relay topic.
    pub channel_prefix: String,
}

impl BrokerAttachment {
    /// Connects the transport selected by `config.provider`.
    pub async fn connect(config: &BrokerConfig) -> AppResult<Self> {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (transport, inbound) = match config.provider.as_str() {
            #[cfg(feature = "redis-pubsub")]
            "redis" => {
                let (transport, inbound) = crate::bridge::RedisTransport::connect(
                    &config.url,
                    &config.reconnect,
                    config.inbound_buffer,
                )
                .await?;
                (Arc::new(transport) as Arc<dyn PubSubTransport>, inbound)
            }
            "memory" => {
                let (transport, inbound) =
                    MemoryBroker::new(config.inbound_buffer).connect(config.inbound_buffer);
                (Arc::new(transport) as Arc<dyn PubSubTransport>, inbound)
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unsupported broker provider: {other}"
                )));
            }
        };

        Ok(Self {
            transport,
            inbound,
            node_id,
            channel_prefix: config.channel_prefix.clone(),
        })
    }
}

/// Central real-time engine that coordinates all WebSocket subsystems.
pub struct RealtimeEngine {
    /// Hub handle.
    pub hub: Hub,
    /// Broadcast facade.
    pub service: RealtimeService,
    /// Inbound protocol dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Presence tracker.
    pub presence: Arc<PresenceTracker>,
    /// Metrics collector.
    pub metrics: Arc<RealtimeMetrics>,
    config: RealtimeConfig,
    bridge: Option<Arc<BrokerBridge>>,
    cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("bridge", &self.bridge)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl RealtimeEngine {
    /// Starts the engine, connecting to the broker when it is enabled.
    pub async fn start(config: &RealtimeConfig, broker: &BrokerConfig) -> AppResult<Self> {
        let attachment = if broker.enabled {
            Some(BrokerAttachment::connect(broker).await?)
        } else {
            info!("Broker disabled, broadcasts stay on this node");
            None
        };
        Self::assemble(config.clone(), attachment).await
    }

    /// Wires every subsystem and spawns the hub loop and presence cleanup.
    pub async fn assemble(
        config: RealtimeConfig,
        broker: Option<BrokerAttachment>,
    ) -> AppResult<Self> {
        let cancel = CancellationToken::new();
        let metrics = Arc::new(RealtimeMetrics::new());
        let (hub, hub_loop) = Hub::new(&config, metrics.clone());

        let mut tasks = vec![tokio::spawn(hub_loop.run(cancel.clone()))];

        let (bridge, relay) = match broker {
            Some(attachment) => {
                let bridge = Arc::new(BrokerBridge::new(
                    attachment.transport,
                    attachment.inbound,
                    attachment.node_id,
                    metrics.clone(),
                ));
                let relay = Arc::new(ClusterRelay::new(
                    bridge.clone(),
                    hub.clone(),
                    attachment.channel_prefix,
                ));
                if let Err(e) = relay.start().await {
                    cancel.cancel();
                    let _ = bridge.close().await;
                    return Err(e);
                }
                (Some(bridge), Some(relay))
            }
            None => (None, None),
        };

        let service = RealtimeService::new(hub.clone(), relay, metrics.clone());
        let presence = Arc::new(PresenceTracker::new(service.clone()));
        tasks.push(presence.clone().spawn_cleanup(
            config.presence_cleanup_interval(),
            config.presence_ttl(),
            cancel.clone(),
        ));

        let documents: Arc<dyn DocumentService> =
            Arc::new(DetachedDocumentService::new(service.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            hub.clone(),
            documents,
            presence.clone(),
            metrics.clone(),
            frame_limits(&config),
        ));

        info!(
            node_id = bridge.as_ref().map(|b| b.source()).unwrap_or("local"),
            "Real-time engine initialized"
        );

        Ok(Self {
            hub,
            service,
            dispatcher,
            presence,
            metrics,
            config,
            bridge,
            cancel,
            tasks: std::sync::Mutex::new(tasks),
            stopped: AtomicBool::new(false),
        })
    }

    /// Replaces the document service used for `query` and `submit`.
    pub fn with_document_service(mut self, documents: Arc<dyn DocumentService>) -> Self {
        self.dispatcher = Arc::new(Dispatcher::new(
            self.hub.clone(),
            documents,
            self.presence.clone(),
            self.metrics.clone(),
            frame_limits(&self.config),
        ));
        self
    }

    /// Realtime configuration in effect.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Broker bridge, if enabled.
    pub fn bridge(&self) -> Option<&Arc<BrokerBridge>> {
        self.bridge.as_ref()
    }

    /// Whether [`RealtimeEngine::shutdown`] has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Connection counts, metrics and broker health.
    pub async fn stats(&self) -> AppResult<RealtimeStats> {
        self.service.stats().await
    }

    /// Stops the engine. Idempotent.
    ///
    /// The hub loop closes every connection's outbound queue before it
    /// exits, so writers flush what they hold and close their sockets.
    /// The broker bridge is closed last.
    pub async fn shutdown(&self) -> AppResult<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down real-time engine");

        self.cancel.cancel();
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Realtime task ended abnormally");
            }
        }

        if let Some(bridge) = &self.bridge {
            bridge.close().await?;
        }

        info!("Real-time engine shut down");
        Ok(())
    }
}

fn frame_limits(config: &RealtimeConfig) -> FrameLimits {
    FrameLimits {
        max_message_bytes: config.max_message_bytes,
        max_control_message_bytes: config.max_control_message_bytes,
    }
}
