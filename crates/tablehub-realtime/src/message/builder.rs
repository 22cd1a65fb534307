//! Helpers for building server-originated messages.

use serde_json::{Value, json};

use crate::channel::ChannelTarget;

use super::types::{ErrorBody, Message, MessageKind};

/// Source tag attached to operations published by the server itself.
pub const SERVER_SOURCE: &str = "server";

/// Reply to an application ping.
pub fn pong(id: Option<String>) -> Message {
    Message::new(MessageKind::Pong).with_id(id)
}

/// Acknowledges a subscription.
pub fn subscribed(id: Option<String>, channel: &str) -> Message {
    Message::new(MessageKind::Subscribe)
        .with_id(id)
        .with_data(json!({ "channel": channel, "status": "subscribed" }))
}

/// Acknowledges an unsubscription.
pub fn unsubscribed(id: Option<String>, channel: &str) -> Message {
    Message::new(MessageKind::Unsubscribe)
        .with_id(id)
        .with_data(json!({ "channel": channel, "status": "unsubscribed" }))
}

/// Reply to a query.
pub fn query_response(id: Option<String>, target: &ChannelTarget, data: Value) -> Message {
    Message::new(MessageKind::QueryResponse)
        .with_id(id)
        .with_target(target.collection.clone(), target.document.clone())
        .with_data(data)
}

/// Reply to a submission.
pub fn submit_response(id: Option<String>, collection: &str, document: &str, data: Value) -> Message {
    Message::new(MessageKind::SubmitResponse)
        .with_id(id)
        .with_target(collection, Some(document.to_string()))
        .with_data(data)
}

/// Protocol error frame.
pub fn error(id: Option<String>, code: u16, message: &str) -> Message {
    let mut msg = Message::new(MessageKind::Error).with_id(id);
    msg.error = Some(ErrorBody {
        code,
        message: message.to_string(),
    });
    msg
}

/// Document operation fan-out.
pub fn document_op(collection: &str, document: Option<&str>, op: Value, source: &str) -> Message {
    Message::new(MessageKind::Op)
        .with_target(collection, document.map(str::to_string))
        .with_data(json!({ "op": op, "source": source }))
}

/// Presence fan-out for one user.
pub fn presence(target: &ChannelTarget, user_id: &str, data: Value) -> Message {
    Message::new(MessageKind::Presence)
        .with_target(target.collection.clone(), target.document.clone())
        .with_data(json!({ "user_id": user_id, "presence": data }))
}

/// Presence fan-out announcing that a user left.
pub fn presence_offline(collection: &str, user_id: &str) -> Message {
    Message::new(MessageKind::Presence)
        .with_target(collection, None)
        .with_data(json!({ "user_id": user_id, "presence": { "status": "offline" } }))
}

/// Cursor fan-out for one user. A null `cursor` means it was removed.
pub fn cursor(target: &ChannelTarget, user_id: &str, cursor: Value) -> Message {
    Message::new(MessageKind::Cursor)
        .with_target(target.collection.clone(), target.document.clone())
        .with_data(json!({ "user_id": user_id, "cursor": cursor }))
}

/// Notification addressed to a single user.
pub fn notification(payload: Value) -> Message {
    Message::new(MessageKind::Notification).with_data(payload)
}

/// System-wide announcement.
pub fn system(message: &str, level: &str) -> Message {
    Message::new(MessageKind::Notification).with_data(json!({
        "kind": "system",
        "message": message,
        "level": level,
    }))
}
