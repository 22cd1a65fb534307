//! Wire-level message definitions shared by clients, the hub, and the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator carried in the `type` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Application-level keepalive from the client.
    Ping,
    /// Reply to a ping.
    Pong,
    /// Join a channel; also the acknowledgement kind.
    Subscribe,
    /// Leave a channel; also the acknowledgement kind.
    Unsubscribe,
    /// Document query request.
    Query,
    /// Reply to a query.
    QueryResponse,
    /// Document operation submission.
    Submit,
    /// Reply to a submission.
    SubmitResponse,
    /// Presence update, inbound or fanned out.
    Presence,
    /// Cursor position, inbound or fanned out. A null position clears it.
    Cursor,
    /// Document operation fan-out.
    Op,
    /// Server-originated notification or system message.
    Notification,
    /// Protocol error.
    Error,
    /// Anything this server does not understand.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Keepalive and subscription frames, subject to the control size limit.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Ping | Self::Pong | Self::Subscribe | Self::Unsubscribe
        )
    }
}

/// Error payload of an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Numeric code, HTTP-like (400, 404, 500, ...).
    pub code: u16,
    /// Human-readable description.
    pub message: String,
}

/// One JSON frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Frame kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Correlation id, echoed from request to response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Target collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Target document within the collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// Kind-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Present on `error` frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Server-side creation time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates an empty message of the given kind, stamped now.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            id: None,
            collection: None,
            document: None,
            data: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the correlation id.
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    /// Sets the collection and optional document.
    pub fn with_target(mut self, collection: impl Into<String>, document: Option<String>) -> Self {
        self.collection = Some(collection.into());
        self.document = document;
        self
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(MessageKind::QueryResponse).unwrap(),
            json!("queryResponse")
        );
        assert_eq!(
            serde_json::to_value(MessageKind::SubmitResponse).unwrap(),
            json!("submitResponse")
        );
        assert_eq!(
            serde_json::to_value(MessageKind::Subscribe).unwrap(),
            json!("subscribe")
        );
        assert_eq!(
            serde_json::to_value(MessageKind::Cursor).unwrap(),
            json!("cursor")
        );
    }

    #[test]
    fn test_unknown_kind_decodes() {
        let msg: Message = serde_json::from_str(r#"{"type":"teleport"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let value = serde_json::to_value(Message::new(MessageKind::Pong)).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("type").unwrap(), "pong");
        assert!(obj.contains_key("timestamp"));
        assert!(!obj.contains_key("id"));
        assert!(!obj.contains_key("data"));
        assert!(!obj.contains_key("error"));
    }

    #[test]
    fn test_control_kinds() {
        assert!(MessageKind::Ping.is_control());
        assert!(MessageKind::Unsubscribe.is_control());
        assert!(!MessageKind::Submit.is_control());
        assert!(!MessageKind::Presence.is_control());
    }
}
