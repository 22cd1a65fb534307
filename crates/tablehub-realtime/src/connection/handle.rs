//! Individual WebSocket connection handle.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::message::types::Message;

/// Unique connection identifier
pub type ConnectionId = Uuid;

/// Why a non-blocking enqueue was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The connection has been closed.
    #[error("connection closed")]
    Closed,
}

/// Mutable state shared by the reader, the hub, and protocol handlers.
#[derive(Debug)]
struct ConnectionState {
    subscriptions: HashSet<String>,
    last_heartbeat: Instant,
}

/// A handle to a single WebSocket connection.
///
/// The outbound queue is the only way other tasks hand data to the
/// connection's writer. Subscriptions and the heartbeat timestamp sit
/// behind a per-connection lock.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// User who owns this connection
    pub user_id: String,
    /// Optional client session, for downstream correlation
    pub session_id: Option<String>,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Message>,
    state: RwLock<ConnectionState>,
    closed: CancellationToken,
}

impl Connection {
    /// Creates a connection and the receiving half of its outbound queue.
    pub fn new(
        user_id: impl Into<String>,
        session_id: Option<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let conn = Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id,
            connected_at: Utc::now(),
            sender,
            state: RwLock::new(ConnectionState {
                subscriptions: HashSet::new(),
                last_heartbeat: Instant::now(),
            }),
            closed: CancellationToken::new(),
        };
        (Arc::new(conn), receiver)
    }

    /// Queues a message for the writer without waiting.
    pub fn try_enqueue(&self, msg: Message) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Closes the outbound queue. The writer drains what is buffered and stops.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Records a ping or pong from the peer.
    pub async fn touch_heartbeat(&self) {
        self.state.write().await.last_heartbeat = Instant::now();
    }

    /// Time of the last ping or pong.
    pub async fn last_heartbeat(&self) -> Instant {
        self.state.read().await.last_heartbeat
    }

    /// Adds a subscription. Returns false if already present.
    pub async fn add_subscription(&self, channel: &str) -> bool {
        self.state
            .write()
            .await
            .subscriptions
            .insert(channel.to_string())
    }

    /// Removes a subscription. Returns false if absent.
    pub async fn remove_subscription(&self, channel: &str) -> bool {
        self.state.write().await.subscriptions.remove(channel)
    }

    /// Drops every subscription, returning what was removed.
    pub async fn clear_subscriptions(&self) -> Vec<String> {
        self.state.write().await.subscriptions.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::MessageKind;

    #[tokio::test]
    async fn test_enqueue_full_does_not_block() {
        let (conn, mut rx) = Connection::new("u1", None, 2);
        assert!(conn.try_enqueue(Message::new(MessageKind::Pong)).is_ok());
        assert!(conn.try_enqueue(Message::new(MessageKind::Pong)).is_ok());
        assert_eq!(
            conn.try_enqueue(Message::new(MessageKind::Pong)),
            Err(EnqueueError::Full)
        );
        assert!(rx.try_recv().is_ok());
        assert!(conn.try_enqueue(Message::new(MessageKind::Pong)).is_ok());
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let (conn, _rx) = Connection::new("u1", None, 4);
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(
            conn.try_enqueue(Message::new(MessageKind::Pong)),
            Err(EnqueueError::Closed)
        );
    }

    #[tokio::test]
    async fn test_enqueue_with_dropped_receiver_is_closed() {
        let (conn, rx) = Connection::new("u1", None, 4);
        drop(rx);
        assert_eq!(
            conn.try_enqueue(Message::new(MessageKind::Pong)),
            Err(EnqueueError::Closed)
        );
    }

    #[tokio::test]
    async fn test_subscription_set() {
        let (conn, _rx) = Connection::new("u1", Some("s1".into()), 4);
        assert!(conn.add_subscription("table1").await);
        assert!(!conn.add_subscription("table1").await);
        assert!(conn.add_subscription("table1.rec1").await);
        assert!(conn.remove_subscription("table1").await);
        assert!(!conn.remove_subscription("table1").await);
        assert_eq!(conn.clear_subscriptions().await, vec!["table1.rec1".to_string()]);
        assert!(conn.clear_subscriptions().await.is_empty());
        assert_eq!(conn.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_heartbeat_advances() {
        let (conn, _rx) = Connection::new("u1", None, 4);
        let first = conn.last_heartbeat().await;
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        conn.touch_heartbeat().await;
        assert!(conn.last_heartbeat().await >= first + std::time::Duration::from_secs(5));
    }
}
