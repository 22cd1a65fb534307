//! Realtime service facade.
//!
//! Entry point for anything outside the connection handlers that needs to
//! reach clients: REST handlers, collaborator services, and the presence
//! tracker. Every broadcast is delivered locally first, then published to
//! the cluster so other nodes can repeat it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use tablehub_core::result::AppResult;

use crate::bridge::{BrokerHealth, ClusterRelay};
use crate::channel::{
    ChannelTarget, TABLE_META_DOCUMENT, field_collection, record_collection, table_collection,
    view_collection,
};
use crate::connection::handle::ConnectionId;
use crate::hub::{Hub, HubStats};
use crate::message::builder;
use crate::message::types::Message;
use crate::metrics::{MetricsSnapshot, RealtimeMetrics};

/// Combined realtime statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStats {
    /// Live connections on this node.
    pub connections: usize,
    /// Distinct users on this node.
    pub users: usize,
    /// Channels with at least one subscriber on this node.
    pub channels: usize,
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
    /// Broker state, absent on single-node deployments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<BrokerHealth>,
}

/// Which table-scoped collection a bulk operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOpKind {
    /// `record_{table}`
    Record,
    /// `view_{table}`
    View,
    /// `field_{table}`
    Field,
    /// Anything else; skipped.
    #[serde(other)]
    Unknown,
}

/// One entry of a bulk publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    /// Target collection kind.
    #[serde(rename = "type")]
    pub kind: BulkOpKind,
    /// Table the document belongs to.
    pub table_id: String,
    /// Record, view or field id.
    pub document_id: String,
    /// Operation components.
    pub operation: Value,
}

/// Outcome of [`RealtimeService::publish_bulk_ops`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Operations delivered locally and published.
    pub published: usize,
    /// Operations whose broadcast or publish failed.
    pub failed: usize,
    /// Operations with an unknown type or a missing id.
    pub skipped: usize,
}

/// Facade over the hub and the cluster relay.
#[derive(Debug, Clone)]
pub struct RealtimeService {
    hub: Hub,
    relay: Option<Arc<ClusterRelay>>,
    metrics: Arc<RealtimeMetrics>,
}

impl RealtimeService {
    /// Creates the facade. Without a relay, broadcasts stay on this node.
    pub fn new(hub: Hub, relay: Option<Arc<ClusterRelay>>, metrics: Arc<RealtimeMetrics>) -> Self {
        Self {
            hub,
            relay,
            metrics,
        }
    }

    /// Broadcasts to a channel on every node.
    ///
    /// `exclude` only applies on this node. Local delivery is requested
    /// before publishing, so a broker error never prevents it.
    pub async fn broadcast_to_channel(
        &self,
        channel: &str,
        message: Message,
        exclude: Vec<ConnectionId>,
    ) -> AppResult<()> {
        let remote = self.relay.as_ref().map(|_| message.clone());
        self.hub.broadcast(channel, message, exclude).await?;

        if let (Some(relay), Some(message)) = (&self.relay, remote) {
            relay.publish_channel(channel, &message).await?;
        }
        Ok(())
    }

    /// Sends a message to every connection of a user on every node.
    pub async fn broadcast_to_user(&self, user_id: &str, message: Message) -> AppResult<()> {
        let remote = self.relay.as_ref().map(|_| message.clone());
        self.hub.broadcast_to_user(user_id, message).await?;

        if let (Some(relay), Some(message)) = (&self.relay, remote) {
            relay.publish_user(user_id, &message).await?;
        }
        Ok(())
    }

    /// Publishes a document operation to `collection` and, when given, to
    /// `collection.document`. The operation is tagged with the server as
    /// its source.
    pub async fn publish_document_op(
        &self,
        collection: &str,
        document: Option<&str>,
        op: Value,
    ) -> AppResult<()> {
        self.relay_document_op(collection, document, op, builder::SERVER_SOURCE, Vec::new())
            .await
    }

    /// Publishes a document operation with an explicit source, skipping
    /// the connections in `exclude` on this node.
    pub async fn relay_document_op(
        &self,
        collection: &str,
        document: Option<&str>,
        op: Value,
        source: &str,
        exclude: Vec<ConnectionId>,
    ) -> AppResult<()> {
        let target = ChannelTarget::new(collection, document)?;
        let message = builder::document_op(
            &target.collection,
            target.document.as_deref(),
            op,
            source,
        );

        debug!(channel = %target, source = %source, "Publishing document op");

        let mut channels = vec![target.collection.clone()];
        if target.document.is_some() {
            channels.push(target.channel_name());
        }

        let mut first_err = None;
        for channel in channels {
            if let Err(e) = self
                .broadcast_to_channel(&channel, message.clone(), exclude.clone())
                .await
            {
                warn!(channel = %channel, error = %e, "Document op broadcast failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Record change in a table.
    pub async fn publish_record_op(&self, table_id: &str, record_id: &str, op: Value) -> AppResult<()> {
        self.publish_document_op(&record_collection(table_id), Some(record_id), op)
            .await
    }

    /// View change in a table.
    pub async fn publish_view_op(&self, table_id: &str, view_id: &str, op: Value) -> AppResult<()> {
        self.publish_document_op(&view_collection(table_id), Some(view_id), op)
            .await
    }

    /// Field change in a table.
    pub async fn publish_field_op(&self, table_id: &str, field_id: &str, op: Value) -> AppResult<()> {
        self.publish_document_op(&field_collection(table_id), Some(field_id), op)
            .await
    }

    /// Publishes a mixed batch of record, view and field operations.
    ///
    /// One bad entry never stops the rest; failures are logged and counted.
    pub async fn publish_bulk_ops(&self, ops: Vec<BulkOperation>) -> BulkReport {
        let mut report = BulkReport::default();

        for op in ops {
            if op.table_id.trim().is_empty() || op.document_id.trim().is_empty() {
                warn!(kind = ?op.kind, "Bulk operation without table or document id skipped");
                report.skipped += 1;
                continue;
            }

            let result = match op.kind {
                BulkOpKind::Record => {
                    self.publish_record_op(&op.table_id, &op.document_id, op.operation)
                        .await
                }
                BulkOpKind::View => {
                    self.publish_view_op(&op.table_id, &op.document_id, op.operation)
                        .await
                }
                BulkOpKind::Field => {
                    self.publish_field_op(&op.table_id, &op.document_id, op.operation)
                        .await
                }
                BulkOpKind::Unknown => {
                    warn!(table_id = %op.table_id, "Unknown bulk operation type skipped");
                    report.skipped += 1;
                    continue;
                }
            };

            match result {
                Ok(()) => report.published += 1,
                Err(e) => {
                    warn!(
                        kind = ?op.kind,
                        table_id = %op.table_id,
                        document_id = %op.document_id,
                        error = %e,
                        "Bulk operation failed"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(?report, "Bulk operations published");
        report
    }

    /// Signals that a table's metadata changed.
    pub async fn publish_table_meta_update(&self, table_id: &str) -> AppResult<()> {
        let op = json!([{ "p": ["meta"], "t": "update", "table_id": table_id }]);
        self.publish_document_op(&table_collection(table_id), Some(TABLE_META_DOCUMENT), op)
            .await
    }

    /// Announces a system message to every connection on every node.
    pub async fn publish_system_message(&self, message: &str, level: &str) -> AppResult<()> {
        self.hub
            .broadcast_all(builder::system(message, level))
            .await?;
        if let Some(relay) = &self.relay {
            relay.publish_system(message, level).await?;
        }
        Ok(())
    }

    /// Sends a notification to one user.
    pub async fn publish_notification(&self, user_id: &str, payload: Value) -> AppResult<()> {
        self.broadcast_to_user(user_id, builder::notification(payload))
            .await
    }

    /// Retires a connection on this node.
    pub async fn disconnect(&self, conn_id: ConnectionId) -> AppResult<()> {
        self.hub.deregister(conn_id).await
    }

    /// Hub counts for this node.
    pub async fn hub_stats(&self) -> AppResult<HubStats> {
        self.hub.stats().await
    }

    /// Hub counts, metrics and broker health.
    pub async fn stats(&self) -> AppResult<RealtimeStats> {
        let hub = self.hub.stats().await?;
        let broker = match &self.relay {
            Some(relay) => Some(relay.bridge().health().await),
            None => None,
        };
        Ok(RealtimeStats {
            connections: hub.total_connections,
            users: hub.total_users,
            channels: hub.total_channels,
            metrics: self.metrics.snapshot(),
            broker,
        })
    }
}
