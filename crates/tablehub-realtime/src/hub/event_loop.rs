//! The hub's single-writer event loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::handle::ConnectionId;
use crate::metrics::RealtimeMetrics;

use super::registry::Registry;
use super::{BroadcastRequest, ControlRequest, RegisterRequest};

/// Why a connection is being retired.
#[derive(Debug, Clone, Copy)]
enum Eviction {
    Requested,
    Stalled,
    Heartbeat,
}

impl Eviction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Stalled => "stalled_consumer",
            Self::Heartbeat => "heartbeat_timeout",
        }
    }
}

/// Owns the registry and serves the hub's request queues.
#[derive(Debug)]
pub struct HubLoop {
    registry: Registry,
    register_rx: mpsc::Receiver<RegisterRequest>,
    deregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<BroadcastRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,
    sweep_interval: Duration,
    heartbeat_timeout: Duration,
    metrics: Arc<RealtimeMetrics>,
}

impl HubLoop {
    pub(crate) fn new(
        register_rx: mpsc::Receiver<RegisterRequest>,
        deregister_rx: mpsc::Receiver<ConnectionId>,
        broadcast_rx: mpsc::Receiver<BroadcastRequest>,
        control_rx: mpsc::Receiver<ControlRequest>,
        sweep_interval: Duration,
        heartbeat_timeout: Duration,
        metrics: Arc<RealtimeMetrics>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            register_rx,
            deregister_rx,
            broadcast_rx,
            control_rx,
            sweep_interval,
            heartbeat_timeout,
            metrics,
        }
    }

    /// Serves requests until `cancel` fires, then force-closes every
    /// remaining connection.
    ///
    /// Cancellation is checked first on every turn. The request queues and
    /// the sweep tick are polled fairly, so a steady stream of broadcasts
    /// cannot hold back subscriptions or the heartbeat sweep.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut sweep =
            tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sweep_interval = ?self.sweep_interval,
            heartbeat_timeout = ?self.heartbeat_timeout,
            "Hub loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(req) = self.register_rx.recv() => self.on_register(req),
                Some(id) = self.deregister_rx.recv() => {
                    self.evict(&id, Eviction::Requested).await;
                }
                Some(req) = self.broadcast_rx.recv() => self.on_broadcast(req).await,
                Some(req) = self.control_rx.recv() => self.on_control(req).await,
                _ = sweep.tick() => self.sweep().await,
            }
        }

        self.shutdown();
    }

    /// Applies whatever is already waiting on the register, deregister and
    /// broadcast queues. Requests arriving meanwhile are left for the main
    /// loop, so this always terminates.
    async fn settle(&mut self) {
        for _ in 0..self.register_rx.len() {
            let Ok(req) = self.register_rx.try_recv() else { break };
            self.on_register(req);
        }
        for _ in 0..self.deregister_rx.len() {
            let Ok(id) = self.deregister_rx.try_recv() else { break };
            self.evict(&id, Eviction::Requested).await;
        }
        for _ in 0..self.broadcast_rx.len() {
            let Ok(req) = self.broadcast_rx.try_recv() else { break };
            self.on_broadcast(req).await;
        }
    }

    fn on_register(&mut self, req: RegisterRequest) {
        let conn = req.conn;
        let (id, user_id) = (conn.id, conn.user_id.clone());
        let added = self.registry.register(conn);
        if added {
            self.metrics.connection_opened();
            info!(
                conn_id = %id,
                user_id = %user_id,
                connections = self.registry.len(),
                "Connection registered"
            );
        } else {
            warn!(conn_id = %id, "Duplicate registration ignored");
        }
        let _ = req.ack.send(added);
    }

    async fn on_broadcast(&mut self, req: BroadcastRequest) {
        let delivery = self.registry.deliver(&req.target, &req.message, &req.exclude);
        self.metrics.broadcast();

        debug!(
            recipients = ?req.target,
            kind = ?req.message.kind,
            delivered = delivery.delivered,
            stalled = delivery.stalled.len(),
            "Broadcast delivered"
        );

        if !delivery.stalled.is_empty() {
            self.metrics.stalled_evicted(delivery.stalled.len() as u64);
            for id in &delivery.stalled {
                self.evict(id, Eviction::Stalled).await;
            }
        }
    }

    async fn on_control(&mut self, req: ControlRequest) {
        match req {
            ControlRequest::Subscribe {
                conn_id,
                channel,
                ack,
            } => {
                let applied = self.registry.subscribe(&conn_id, &channel).await;
                debug!(conn_id = %conn_id, channel = %channel, applied, "Subscribed");
                let _ = ack.send(applied);
            }
            ControlRequest::Unsubscribe {
                conn_id,
                channel,
                ack,
            } => {
                let applied = self.registry.unsubscribe(&conn_id, &channel).await;
                debug!(conn_id = %conn_id, channel = %channel, applied, "Unsubscribed");
                let _ = ack.send(applied);
            }
            ControlRequest::Snapshot { ack } => {
                self.settle().await;
                let _ = ack.send(self.registry.snapshot());
            }
        }
    }

    async fn sweep(&mut self) {
        let stale = self
            .registry
            .stale(Instant::now(), self.heartbeat_timeout)
            .await;
        if stale.is_empty() {
            return;
        }

        self.metrics.heartbeat_evicted(stale.len() as u64);
        for id in &stale {
            self.evict(id, Eviction::Heartbeat).await;
        }
    }

    async fn evict(&mut self, id: &ConnectionId, reason: Eviction) {
        if let Some(conn) = self.registry.deregister(id).await {
            self.metrics.connection_closed();
            match reason {
                Eviction::Requested => info!(
                    conn_id = %id,
                    user_id = %conn.user_id,
                    reason = reason.as_str(),
                    "Connection deregistered"
                ),
                Eviction::Stalled | Eviction::Heartbeat => warn!(
                    conn_id = %id,
                    user_id = %conn.user_id,
                    reason = reason.as_str(),
                    "Connection evicted"
                ),
            }
        }
    }

    fn shutdown(&mut self) {
        let closed = self.registry.drain();
        for _ in &closed {
            self.metrics.connection_closed();
        }
        info!(closed = closed.len(), "Hub loop stopped, connections closed");
    }
}
