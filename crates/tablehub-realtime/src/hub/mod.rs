//! The hub: single authority over all live connections in this process.
//!
//! [`Hub`] is a cheap, clonable handle. Every mutation travels through a
//! bounded queue into [`HubLoop`], which alone owns the [`Registry`].

pub mod event_loop;
pub mod registry;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use tablehub_core::config::RealtimeConfig;
use tablehub_core::error::AppError;
use tablehub_core::result::AppResult;

use crate::connection::handle::{Connection, ConnectionId};
use crate::message::types::Message;
use crate::metrics::RealtimeMetrics;

pub use event_loop::HubLoop;
pub use registry::{HubSnapshot, HubStats, Registry, Target};

pub(crate) struct RegisterRequest {
    pub conn: Arc<Connection>,
    pub ack: oneshot::Sender<bool>,
}

pub(crate) struct BroadcastRequest {
    pub target: Target,
    pub message: Message,
    pub exclude: Vec<ConnectionId>,
}

pub(crate) enum ControlRequest {
    Subscribe {
        conn_id: ConnectionId,
        channel: String,
        ack: oneshot::Sender<bool>,
    },
    Unsubscribe {
        conn_id: ConnectionId,
        channel: String,
        ack: oneshot::Sender<bool>,
    },
    Snapshot {
        ack: oneshot::Sender<HubSnapshot>,
    },
}

/// Handle for submitting requests to the hub loop.
#[derive(Debug, Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<RegisterRequest>,
    deregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<BroadcastRequest>,
    control_tx: mpsc::Sender<ControlRequest>,
}

impl Hub {
    /// Creates a hub handle and the loop that serves it.
    ///
    /// The loop does nothing until [`HubLoop::run`] is spawned.
    pub fn new(config: &RealtimeConfig, metrics: Arc<RealtimeMetrics>) -> (Self, HubLoop) {
        let capacity = config.hub_queue_capacity;
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (deregister_tx, deregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (control_tx, control_rx) = mpsc::channel(capacity);

        let hub = Self {
            register_tx,
            deregister_tx,
            broadcast_tx,
            control_tx,
        };
        let event_loop = HubLoop::new(
            register_rx,
            deregister_rx,
            broadcast_rx,
            control_rx,
            config.sweep_interval(),
            config.heartbeat_timeout(),
            metrics,
        );
        (hub, event_loop)
    }

    /// Registers a connection and waits until the loop has indexed it.
    pub async fn register(&self, conn: Arc<Connection>) -> AppResult<()> {
        let (ack, done) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { conn, ack })
            .await
            .map_err(|_| stopped())?;
        if done.await.map_err(|_| stopped())? {
            Ok(())
        } else {
            Err(AppError::conflict("connection already registered"))
        }
    }

    /// Asks the loop to retire a connection. Unknown ids are ignored.
    pub async fn deregister(&self, conn_id: ConnectionId) -> AppResult<()> {
        self.deregister_tx
            .send(conn_id)
            .await
            .map_err(|_| stopped())
    }

    /// Subscribes a connection to a channel. Returns false if the
    /// connection is no longer registered.
    pub async fn subscribe(&self, conn_id: ConnectionId, channel: &str) -> AppResult<bool> {
        let (ack, done) = oneshot::channel();
        self.control(ControlRequest::Subscribe {
            conn_id,
            channel: channel.to_string(),
            ack,
        })
        .await?;
        done.await.map_err(|_| stopped())
    }

    /// Unsubscribes a connection from a channel.
    pub async fn unsubscribe(&self, conn_id: ConnectionId, channel: &str) -> AppResult<bool> {
        let (ack, done) = oneshot::channel();
        self.control(ControlRequest::Unsubscribe {
            conn_id,
            channel: channel.to_string(),
            ack,
        })
        .await?;
        done.await.map_err(|_| stopped())
    }

    /// Queues a broadcast to every subscriber of `channel` except `exclude`.
    pub async fn broadcast(
        &self,
        channel: &str,
        message: Message,
        exclude: Vec<ConnectionId>,
    ) -> AppResult<()> {
        self.send_broadcast(Target::Channel(channel.to_string()), message, exclude)
            .await
    }

    /// Queues a message for every connection of a user.
    pub async fn broadcast_to_user(&self, user_id: &str, message: Message) -> AppResult<()> {
        self.send_broadcast(Target::User(user_id.to_string()), message, Vec::new())
            .await
    }

    /// Queues a message for every connection.
    pub async fn broadcast_all(&self, message: Message) -> AppResult<()> {
        self.send_broadcast(Target::All, message, Vec::new()).await
    }

    async fn send_broadcast(
        &self,
        target: Target,
        message: Message,
        exclude: Vec<ConnectionId>,
    ) -> AppResult<()> {
        self.broadcast_tx
            .send(BroadcastRequest {
                target,
                message,
                exclude,
            })
            .await
            .map_err(|_| stopped())
    }

    /// Copies the loop's indexes.
    ///
    /// Registrations, deregistrations and broadcasts queued before the call
    /// are applied first, so the snapshot doubles as a barrier.
    pub async fn snapshot(&self) -> AppResult<HubSnapshot> {
        let (ack, done) = oneshot::channel();
        self.control(ControlRequest::Snapshot { ack }).await?;
        done.await.map_err(|_| stopped())
    }

    /// Connection, user, and channel counts.
    pub async fn stats(&self) -> AppResult<HubStats> {
        Ok(self.snapshot().await?.stats())
    }

    async fn control(&self, request: ControlRequest) -> AppResult<()> {
        self.control_tx.send(request).await.map_err(|_| stopped())
    }
}

fn stopped() -> AppError {
    AppError::service_unavailable("hub is not running")
}
