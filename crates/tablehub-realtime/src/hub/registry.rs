//! Connection registry owned by the hub loop.
//!
//! Holds three indexes: by connection id, by user id, and by channel. Only
//! the hub's event loop touches a `Registry`, so none of the maps are locked.
//! A channel entry exists only while at least one connection subscribes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::connection::handle::{Connection, ConnectionId};
use crate::message::types::Message;

/// Who a broadcast is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every subscriber of a channel.
    Channel(String),
    /// Every connection of a user.
    User(String),
    /// Every registered connection.
    All,
}

/// Outcome of delivering one broadcast.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Connections the message was queued on.
    pub delivered: usize,
    /// Connections whose queue refused the message.
    pub stalled: Vec<ConnectionId>,
}

/// Hub counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Registered connections.
    pub total_connections: usize,
    /// Distinct users with at least one connection.
    pub total_users: usize,
    /// Channels with at least one subscriber.
    pub total_channels: usize,
}

/// Point-in-time copy of all three indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubSnapshot {
    /// Registered connection ids.
    pub connections: Vec<ConnectionId>,
    /// User id → connection ids.
    pub users: BTreeMap<String, Vec<ConnectionId>>,
    /// Channel name → subscribed connection ids.
    pub channels: BTreeMap<String, Vec<ConnectionId>>,
}

impl HubSnapshot {
    /// Counts derived from the snapshot.
    pub fn stats(&self) -> HubStats {
        HubStats {
            total_connections: self.connections.len(),
            total_users: self.users.len(),
            total_channels: self.channels.len(),
        }
    }

    /// Subscribers of a channel, empty if the channel does not exist.
    pub fn subscribers(&self, channel: &str) -> &[ConnectionId] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The hub's indexes.
#[derive(Debug, Default)]
pub struct Registry {
    by_id: HashMap<ConnectionId, Arc<Connection>>,
    by_user: HashMap<String, HashSet<ConnectionId>>,
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection into the id and user indexes.
    ///
    /// Returns false if the id was already registered.
    pub fn register(&mut self, conn: Arc<Connection>) -> bool {
        if self.by_id.contains_key(&conn.id) {
            return false;
        }
        self.by_user
            .entry(conn.user_id.clone())
            .or_default()
            .insert(conn.id);
        self.by_id.insert(conn.id, conn);
        true
    }

    /// Removes a connection from every index and closes its outbound queue.
    ///
    /// Unknown ids are a no-op.
    pub async fn deregister(&mut self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let conn = self.by_id.remove(id)?;

        if let Some(ids) = self.by_user.get_mut(&conn.user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(&conn.user_id);
            }
        }

        for channel in conn.clear_subscriptions().await {
            self.detach(&channel, id);
        }

        conn.close();
        Some(conn)
    }

    /// Subscribes a registered connection to a channel.
    ///
    /// Returns false if the connection is unknown.
    pub async fn subscribe(&mut self, id: &ConnectionId, channel: &str) -> bool {
        let Some(conn) = self.by_id.get(id) else {
            return false;
        };
        conn.add_subscription(channel).await;
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(*id);
        true
    }

    /// Unsubscribes a connection, pruning the channel if it becomes empty.
    ///
    /// Returns false if the connection is unknown.
    pub async fn unsubscribe(&mut self, id: &ConnectionId, channel: &str) -> bool {
        let Some(conn) = self.by_id.get(id) else {
            return false;
        };
        conn.remove_subscription(channel).await;
        self.detach(channel, id);
        true
    }

    fn detach(&mut self, channel: &str, id: &ConnectionId) {
        if let Some(ids) = self.channels.get_mut(channel) {
            ids.remove(id);
            if ids.is_empty() {
                self.channels.remove(channel);
                debug!(channel = %channel, "Channel pruned");
            }
        }
    }

    /// Queues `message` on every addressed connection not in `exclude`.
    ///
    /// Never waits: connections whose queue is full or closed are reported
    /// as stalled for the caller to deregister.
    pub fn deliver(&self, target: &Target, message: &Message, exclude: &[ConnectionId]) -> Delivery {
        let mut delivery = Delivery::default();

        let mut send = |id: &ConnectionId| {
            if exclude.contains(id) {
                return;
            }
            let Some(conn) = self.by_id.get(id) else {
                return;
            };
            match conn.try_enqueue(message.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(_) => delivery.stalled.push(*id),
            }
        };

        match target {
            Target::Channel(channel) => {
                if let Some(ids) = self.channels.get(channel) {
                    ids.iter().for_each(&mut send);
                }
            }
            Target::User(user_id) => {
                if let Some(ids) = self.by_user.get(user_id) {
                    ids.iter().for_each(&mut send);
                }
            }
            Target::All => self.by_id.keys().for_each(&mut send),
        }

        delivery
    }

    /// Connections whose last heartbeat is older than `timeout` at `now`.
    pub async fn stale(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let mut stale = Vec::new();
        for (id, conn) in &self.by_id {
            if now.saturating_duration_since(conn.last_heartbeat().await) > timeout {
                stale.push(*id);
            }
        }
        stale
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Copies all indexes.
    pub fn snapshot(&self) -> HubSnapshot {
        let sorted = |ids: &HashSet<ConnectionId>| {
            let mut ids: Vec<_> = ids.iter().copied().collect();
            ids.sort();
            ids
        };
        let mut connections: Vec<_> = self.by_id.keys().copied().collect();
        connections.sort();

        HubSnapshot {
            connections,
            users: self
                .by_user
                .iter()
                .map(|(user, ids)| (user.clone(), sorted(ids)))
                .collect(),
            channels: self
                .channels
                .iter()
                .map(|(channel, ids)| (channel.clone(), sorted(ids)))
                .collect(),
        }
    }

    /// Removes and closes every connection.
    pub fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.by_user.clear();
        self.channels.clear();
        let conns: Vec<_> = self.by_id.drain().map(|(_, conn)| conn).collect();
        for conn in &conns {
            conn.close();
        }
        conns
    }
}
