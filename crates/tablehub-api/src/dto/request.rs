//! Request DTOs.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use tablehub_realtime::message::types::Message;
use tablehub_realtime::service::BulkOperation;

/// Query parameters of the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Authenticated user id, as resolved by the identity provider.
    pub user_id: Option<String>,
    /// Client session id, for correlation only.
    pub session_id: Option<String>,
}

/// Broadcast a message to one channel.
#[derive(Debug, Deserialize)]
pub struct ChannelBroadcastRequest {
    /// Channel name (`collection` or `collection.document`).
    pub channel: String,
    /// Message delivered to subscribers.
    pub message: Message,
    /// Connections on this node to skip.
    #[serde(default)]
    pub exclude: Vec<Uuid>,
}

/// Send a message to every connection of one user.
#[derive(Debug, Deserialize)]
pub struct UserBroadcastRequest {
    /// Target user.
    pub user_id: String,
    /// Message delivered to each connection.
    pub message: Message,
}

/// Publish an operation on a collection, optionally narrowed to a document.
#[derive(Debug, Deserialize)]
pub struct DocumentOpRequest {
    /// Collection name.
    pub collection: String,
    /// Document id.
    #[serde(default)]
    pub document: Option<String>,
    /// Operation components.
    pub operation: Value,
}

/// Publish a record change.
#[derive(Debug, Deserialize)]
pub struct RecordOpRequest {
    /// Table the record belongs to.
    pub table_id: String,
    /// Record id.
    pub record_id: String,
    /// Operation components.
    pub operation: Value,
}

/// Publish a view change.
#[derive(Debug, Deserialize)]
pub struct ViewOpRequest {
    /// Table the view belongs to.
    pub table_id: String,
    /// View id.
    pub view_id: String,
    /// Operation components.
    pub operation: Value,
}

/// Publish a field change.
#[derive(Debug, Deserialize)]
pub struct FieldOpRequest {
    /// Table the field belongs to.
    pub table_id: String,
    /// Field id.
    pub field_id: String,
    /// Operation components.
    pub operation: Value,
}

/// Publish a batch of record, view and field changes.
#[derive(Debug, Deserialize)]
pub struct BulkOpsRequest {
    /// Operations, published in order.
    pub operations: Vec<BulkOperation>,
}

/// Announce a system message to everyone.
#[derive(Debug, Deserialize)]
pub struct SystemMessageRequest {
    /// Text shown to users.
    pub message: String,
    /// Severity (`info`, `warning`, ...).
    #[serde(default = "default_level")]
    pub level: String,
}

/// Signal a table metadata change.
#[derive(Debug, Deserialize)]
pub struct TableMetaRequest {
    /// Table whose metadata changed.
    pub table_id: String,
}

fn default_level() -> String {
    "info".to_string()
}
