//! Presence tracker: who is looking at which collection, and where their
//! cursor sits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tablehub_core::error::AppError;
use tablehub_core::result::AppResult;

use crate::channel::ChannelTarget;
use crate::connection::handle::ConnectionId;
use crate::message::builder;
use crate::message::request::{CursorUpdate, PresenceUpdate};
use crate::message::types::Message;
use crate::protocol::collaborator::{PresenceService, RequestContext};
use crate::service::RealtimeService;

/// Collection → user id → entry
type Board<T> = DashMap<String, HashMap<String, T>>;

/// One user's presence in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// User the entry belongs to.
    pub user_id: String,
    /// Session that sent the latest update.
    pub session_id: Option<String>,
    /// Opaque presence payload.
    pub data: Value,
    /// Time of the latest update.
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    conn_id: Option<ConnectionId>,
}

/// One user's cursor in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// User the cursor belongs to.
    pub user_id: String,
    /// Session that moved it last.
    pub session_id: Option<String>,
    /// Document the cursor sits in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// Opaque position.
    pub position: Value,
    /// Opaque selection range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Value>,
    /// Time of the latest move.
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    conn_id: Option<ConnectionId>,
}

/// Tracks presence and cursors per collection and fans changes out to the
/// collection channel.
///
/// Each entry remembers the connection that last wrote it, so a closing
/// connection takes exactly its own entries with it.
#[derive(Debug)]
pub struct PresenceTracker {
    presence: Board<PresenceEntry>,
    cursors: Board<CursorEntry>,
    /// Used to broadcast updates locally and across nodes
    service: RealtimeService,
}

impl PresenceTracker {
    /// Create a tracker that broadcasts through `service`.
    pub fn new(service: RealtimeService) -> Self {
        Self {
            presence: DashMap::new(),
            cursors: DashMap::new(),
            service,
        }
    }

    /// Record or replace a user's presence in a collection.
    pub fn upsert(&self, collection: &str, ctx: &RequestContext, data: Value) -> PresenceEntry {
        let entry = PresenceEntry {
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            data,
            last_seen: Utc::now(),
            conn_id: Some(ctx.conn_id),
        };
        put(&self.presence, collection, &ctx.user_id, entry.clone());
        entry
    }

    /// Remove a user's presence from a collection.
    pub fn remove(&self, collection: &str, user_id: &str) -> Option<PresenceEntry> {
        take(&self.presence, collection, user_id)
    }

    /// Everyone present in a collection, ordered by user id.
    pub fn list(&self, collection: &str) -> Vec<PresenceEntry> {
        let mut entries = values(&self.presence, collection);
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    /// Record or move a user's cursor in a collection.
    pub fn set_cursor(
        &self,
        collection: &str,
        ctx: &RequestContext,
        document: Option<String>,
        position: Value,
        selection: Option<Value>,
    ) -> CursorEntry {
        let entry = CursorEntry {
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            document,
            position,
            selection,
            updated_at: Utc::now(),
            conn_id: Some(ctx.conn_id),
        };
        put(&self.cursors, collection, &ctx.user_id, entry.clone());
        entry
    }

    /// Remove a user's cursor from a collection.
    pub fn remove_cursor(&self, collection: &str, user_id: &str) -> Option<CursorEntry> {
        take(&self.cursors, collection, user_id)
    }

    /// Every cursor in a collection, ordered by user id.
    pub fn cursors(&self, collection: &str) -> Vec<CursorEntry> {
        let mut entries = values(&self.cursors, collection);
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    /// Drop entries not updated within `ttl`. Returns how many were removed.
    pub fn cleanup_stale(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.remove_seen_before(cutoff)
    }

    /// Drop presence and cursor entries last touched before `cutoff`.
    pub fn remove_seen_before(&self, cutoff: DateTime<Utc>) -> usize {
        drain_where(&self.presence, |e| e.last_seen < cutoff).len()
            + drain_where(&self.cursors, |e| e.updated_at < cutoff).len()
    }

    /// Removes a user from a collection and announces it as offline.
    ///
    /// Returns false, without broadcasting, if the user had neither
    /// presence nor a cursor there.
    pub async fn leave(&self, collection: &str, user_id: &str) -> AppResult<bool> {
        let presence = self.remove(collection, user_id);
        let cursor = self.remove_cursor(collection, user_id);
        if presence.is_none() && cursor.is_none() {
            return Ok(false);
        }

        let mut departures = vec![builder::presence_offline(collection, user_id)];
        if let Some(cursor) = cursor {
            departures.push(cursor_cleared(collection, &cursor));
        }
        self.announce(collection, departures).await?;

        debug!(collection = %collection, user_id = %user_id, "User left collection");
        Ok(true)
    }

    /// Run [`PresenceTracker::cleanup_stale`] every `interval` until `cancel` fires.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.cleanup_stale(ttl);
                        if removed > 0 {
                            info!(removed, "Stale presence entries removed");
                        }
                    }
                }
            }
            debug!("Presence cleanup stopped");
        })
    }

    async fn announce(&self, collection: &str, messages: Vec<Message>) -> AppResult<()> {
        let mut first_err: Option<AppError> = None;
        for msg in messages {
            if let Err(e) = self
                .service
                .broadcast_to_channel(collection, msg, Vec::new())
                .await
            {
                warn!(collection = %collection, error = %e, "Presence departure broadcast failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl PresenceService for PresenceTracker {
    async fn update(&self, ctx: &RequestContext, update: PresenceUpdate) -> AppResult<()> {
        let collection = update.target.collection.as_str();
        self.upsert(collection, ctx, update.data.clone());

        let msg = builder::presence(&update.target, &ctx.user_id, update.data);
        self.service
            .broadcast_to_channel(collection, msg, vec![ctx.conn_id])
            .await
    }

    async fn update_cursor(&self, ctx: &RequestContext, update: CursorUpdate) -> AppResult<()> {
        let collection = update.target.collection.as_str();
        let cursor = match update.position {
            Some(position) => {
                let entry = self.set_cursor(
                    collection,
                    ctx,
                    update.target.document.clone(),
                    position,
                    update.selection,
                );
                json!({ "position": entry.position, "selection": entry.selection })
            }
            None => {
                self.remove_cursor(collection, &ctx.user_id);
                Value::Null
            }
        };

        let msg = builder::cursor(&update.target, &ctx.user_id, cursor);
        self.service
            .broadcast_to_channel(collection, msg, vec![ctx.conn_id])
            .await
    }

    async fn disconnect(&self, ctx: &RequestContext) -> AppResult<()> {
        let owned = |conn_id: &Option<ConnectionId>| *conn_id == Some(ctx.conn_id);
        let presence = drain_where(&self.presence, |e| owned(&e.conn_id));
        let cursors = drain_where(&self.cursors, |e| owned(&e.conn_id));
        if presence.is_empty() && cursors.is_empty() {
            return Ok(());
        }

        let mut departures: HashMap<String, Vec<Message>> = HashMap::new();
        for (collection, entry) in presence {
            let msg = builder::presence_offline(&collection, &entry.user_id);
            departures.entry(collection).or_default().push(msg);
        }
        for (collection, entry) in cursors {
            let msg = cursor_cleared(&collection, &entry);
            departures.entry(collection).or_default().push(msg);
        }

        debug!(
            conn_id = %ctx.conn_id,
            collections = departures.len(),
            "Presence released"
        );

        let mut first_err = None;
        for (collection, messages) in departures {
            if let Err(e) = self.announce(&collection, messages).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn cursor_cleared(collection: &str, entry: &CursorEntry) -> Message {
    let target = ChannelTarget {
        collection: collection.to_string(),
        document: entry.document.clone(),
    };
    builder::cursor(&target, &entry.user_id, Value::Null)
}

fn put<T>(board: &Board<T>, collection: &str, user_id: &str, entry: T) {
    board
        .entry(collection.to_string())
        .or_default()
        .insert(user_id.to_string(), entry);
}

fn take<T>(board: &Board<T>, collection: &str, user_id: &str) -> Option<T> {
    let removed = board
        .get_mut(collection)
        .and_then(|mut users| users.remove(user_id));
    board.remove_if(collection, |_, users| users.is_empty());
    removed
}

fn values<T: Clone>(board: &Board<T>, collection: &str) -> Vec<T> {
    board
        .get(collection)
        .map(|users| users.values().cloned().collect())
        .unwrap_or_default()
}

/// Removes every entry matching `matches`, pruning empty collections.
fn drain_where<T>(board: &Board<T>, matches: impl Fn(&T) -> bool) -> Vec<(String, T)> {
    let mut removed = Vec::new();
    board.retain(|collection, users| {
        let gone: Vec<String> = users
            .iter()
            .filter(|(_, entry)| matches(entry))
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in gone {
            if let Some(entry) = users.remove(&user_id) {
                removed.push((collection.clone(), entry));
            }
        }
        !users.is_empty()
    });
    removed
}
