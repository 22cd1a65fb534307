//! Typed client requests.
//!
//! Raw [`Message`] frames are converted into a closed [`Request`] enum at
//! decode time, so malformed payloads are rejected before dispatch.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use tablehub_core::error::AppError;

use crate::channel::ChannelTarget;

use super::builder;
use super::types::{Message, MessageKind};

/// A query against a collection or document.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// What is being queried.
    pub target: ChannelTarget,
    /// Opaque query expression.
    pub query: Value,
    /// Opaque query options.
    pub options: Option<Value>,
}

/// A batch of operations against one document.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    /// Collection holding the document.
    pub collection: String,
    /// Document being modified.
    pub document: String,
    /// Opaque operations, applied in order.
    pub op: Vec<Value>,
    /// Client-supplied origin tag.
    pub source: Option<String>,
}

/// A presence update scoped to a collection or document.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceUpdate {
    /// Where the presence applies.
    pub target: ChannelTarget,
    /// Opaque presence object (cursor, selection, ...).
    pub data: Value,
}

/// A cursor move, or a cursor removal when `position` is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorUpdate {
    /// Collection, and the document the cursor sits in.
    pub target: ChannelTarget,
    /// Opaque cursor position.
    pub position: Option<Value>,
    /// Opaque selection range.
    pub selection: Option<Value>,
}

/// Closed set of requests a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Application keepalive.
    Ping,
    /// Reply to a server ping.
    Pong,
    /// Join a channel.
    Subscribe(ChannelTarget),
    /// Leave a channel.
    Unsubscribe(ChannelTarget),
    /// Document query.
    Query(QueryRequest),
    /// Document operation submission.
    Submit(SubmitRequest),
    /// Presence update.
    Presence(PresenceUpdate),
    /// Cursor move or removal.
    Cursor(CursorUpdate),
    /// A kind clients are not expected to send.
    Unsupported(MessageKind),
}

/// A decoded request plus its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    /// Correlation id echoed in the response.
    pub id: Option<String>,
    /// Kind as received.
    pub kind: MessageKind,
    /// Typed payload.
    pub request: Request,
}

/// A client protocol error, answered with an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol error {code}: {message}")]
pub struct ProtocolError {
    /// Correlation id of the offending request, if it had one.
    pub id: Option<String>,
    /// Numeric code.
    pub code: u16,
    /// Description.
    pub message: String,
}

impl ProtocolError {
    /// Wraps an application error for the request with the given id.
    pub fn from_app(id: Option<String>, err: &AppError) -> Self {
        Self {
            id,
            code: err.kind.code(),
            message: err.message.clone(),
        }
    }

    /// Builds the `error` frame sent back to the client.
    pub fn to_message(&self) -> Message {
        builder::error(self.id.clone(), self.code, &self.message)
    }
}

#[derive(Debug, Deserialize)]
struct QueryPayload {
    #[serde(default)]
    query: Value,
    #[serde(default)]
    options: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SubmitPayload {
    op: Vec<Value>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CursorPayload {
    #[serde(default)]
    position: Option<Value>,
    #[serde(default)]
    selection: Option<Value>,
}

impl TryFrom<Message> for ClientMessage {
    type Error = ProtocolError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        let id = msg.id.clone();
        let kind = msg.kind;
        let request = decode_request(msg).map_err(|e| ProtocolError::from_app(id.clone(), &e))?;
        Ok(Self { id, kind, request })
    }
}

fn decode_request(msg: Message) -> Result<Request, AppError> {
    let request = match msg.kind {
        MessageKind::Ping => Request::Ping,
        MessageKind::Pong => Request::Pong,
        MessageKind::Subscribe => Request::Subscribe(target_of(&msg)?),
        MessageKind::Unsubscribe => Request::Unsubscribe(target_of(&msg)?),
        MessageKind::Query => {
            let target = target_of(&msg)?;
            let payload: QueryPayload = match msg.data {
                Some(data) => payload_of(data, "query")?,
                None => QueryPayload {
                    query: Value::Null,
                    options: None,
                },
            };
            Request::Query(QueryRequest {
                target,
                query: payload.query,
                options: payload.options,
            })
        }
        MessageKind::Submit => {
            let target = target_of(&msg)?;
            let document = target
                .document
                .ok_or_else(|| AppError::validation("document is required"))?;
            let data = msg
                .data
                .ok_or_else(|| AppError::validation("submit data is required"))?;
            let payload: SubmitPayload = payload_of(data, "submit")?;
            Request::Submit(SubmitRequest {
                collection: target.collection,
                document,
                op: payload.op,
                source: payload.source,
            })
        }
        MessageKind::Presence => {
            let target = target_of(&msg)?;
            let data = match msg.data {
                Some(data @ Value::Object(_)) => data,
                Some(_) => return Err(AppError::validation("presence data must be an object")),
                None => return Err(AppError::validation("presence data is required")),
            };
            Request::Presence(PresenceUpdate { target, data })
        }
        MessageKind::Cursor => {
            let target = target_of(&msg)?;
            let payload: CursorPayload = match msg.data {
                Some(data @ Value::Object(_)) => payload_of(data, "cursor")?,
                Some(Value::Null) | None => CursorPayload {
                    position: None,
                    selection: None,
                },
                Some(_) => return Err(AppError::validation("cursor data must be an object")),
            };
            Request::Cursor(CursorUpdate {
                target,
                position: payload.position,
                selection: payload.selection,
            })
        }
        other => Request::Unsupported(other),
    };
    Ok(request)
}

fn target_of(msg: &Message) -> Result<ChannelTarget, AppError> {
    ChannelTarget::new(
        msg.collection.as_deref().unwrap_or_default(),
        msg.document.as_deref(),
    )
}

fn payload_of<T: serde::de::DeserializeOwned>(data: Value, what: &str) -> Result<T, AppError> {
    serde_json::from_value(data)
        .map_err(|e| AppError::validation(format!("invalid {what} payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Result<ClientMessage, ProtocolError> {
        let msg: Message = serde_json::from_str(raw).unwrap();
        ClientMessage::try_from(msg)
    }

    #[test]
    fn test_subscribe_with_document() {
        let msg =
            decode(r#"{"type":"subscribe","id":"1","collection":"table1","document":"rec1"}"#)
                .unwrap();
        assert_eq!(msg.id.as_deref(), Some("1"));
        match msg.request {
            Request::Subscribe(target) => assert_eq!(target.channel_name(), "table1.rec1"),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_without_collection_is_400() {
        let err = decode(r#"{"type":"subscribe","id":"7"}"#).unwrap_err();
        assert_eq!(err.code, 400);
        assert_eq!(err.id.as_deref(), Some("7"));
        assert_eq!(err.message, "collection is required");
    }

    #[test]
    fn test_unsubscribe_requires_collection() {
        let err = decode(r#"{"type":"unsubscribe"}"#).unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_query_defaults_without_data() {
        let msg = decode(r#"{"type":"query","id":"q","collection":"record_t1"}"#).unwrap();
        match msg.request {
            Request::Query(q) => {
                assert_eq!(q.target.collection, "record_t1");
                assert!(q.query.is_null());
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_query_with_non_object_data_rejected() {
        let err = decode(r#"{"type":"query","collection":"c","data":42}"#).unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_submit_requires_document_and_ops() {
        assert!(decode(r#"{"type":"submit","collection":"c","data":{"op":[]}}"#).is_err());
        assert!(decode(r#"{"type":"submit","collection":"c","document":"d"}"#).is_err());
        assert!(
            decode(r#"{"type":"submit","collection":"c","document":"d","data":{"op":"x"}}"#)
                .is_err()
        );

        let msg = decode(
            r#"{"type":"submit","id":"s1","collection":"c","document":"d","data":{"op":[{"p":["f"],"oi":1}],"source":"tab-1"}}"#,
        )
        .unwrap();
        match msg.request {
            Request::Submit(s) => {
                assert_eq!(s.document, "d");
                assert_eq!(s.op.len(), 1);
                assert_eq!(s.source.as_deref(), Some("tab-1"));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_presence_requires_object() {
        assert!(decode(r#"{"type":"presence","collection":"c","data":"here"}"#).is_err());
        let msg = decode(r#"{"type":"presence","collection":"c","data":{"cursor":3}}"#).unwrap();
        assert!(matches!(msg.request, Request::Presence(_)));
    }

    #[test]
    fn test_cursor_position_and_removal() {
        let msg = decode(
            r#"{"type":"cursor","collection":"table1","document":"rec1","data":{"position":{"row":2},"selection":{"rows":[2,3]}}}"#,
        )
        .unwrap();
        match msg.request {
            Request::Cursor(c) => {
                assert_eq!(c.target.channel_name(), "table1.rec1");
                assert_eq!(c.position, Some(serde_json::json!({"row": 2})));
                assert!(c.selection.is_some());
            }
            other => panic!("unexpected request {other:?}"),
        }

        let msg = decode(r#"{"type":"cursor","collection":"table1","data":{"position":null}}"#)
            .unwrap();
        assert!(matches!(msg.request, Request::Cursor(CursorUpdate { position: None, .. })));

        assert!(decode(r#"{"type":"cursor","collection":"table1","data":[1]}"#).is_err());
        assert!(decode(r#"{"type":"cursor","data":{}}"#).is_err());
    }

    #[test]
    fn test_server_only_kinds_are_unsupported() {
        let msg = decode(r#"{"type":"op"}"#).unwrap();
        assert_eq!(msg.request, Request::Unsupported(MessageKind::Op));
        let msg = decode(r#"{"type":"whatever"}"#).unwrap();
        assert_eq!(msg.request, Request::Unsupported(MessageKind::Unknown));
    }
}
