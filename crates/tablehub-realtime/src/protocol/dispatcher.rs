//! Inbound frame decoding and dispatch by kind.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::connection::handle::Connection;
use crate::hub::Hub;
use crate::message::builder;
use crate::message::request::{ClientMessage, ProtocolError, Request};
use crate::message::types::{Message, MessageKind};
use crate::message::validator::{FrameLimits, validate_inbound};
use crate::metrics::RealtimeMetrics;

use super::collaborator::{DocumentService, PresenceService, RequestContext};

/// Routes decoded client requests to the hub and collaborator services.
///
/// Every reply goes onto the connection's outbound queue without waiting;
/// a full queue drops the reply and logs it.
pub struct Dispatcher {
    hub: Hub,
    documents: Arc<dyn DocumentService>,
    presence: Arc<dyn PresenceService>,
    metrics: Arc<RealtimeMetrics>,
    limits: FrameLimits,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("limits", &self.limits)
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        hub: Hub,
        documents: Arc<dyn DocumentService>,
        presence: Arc<dyn PresenceService>,
        metrics: Arc<RealtimeMetrics>,
        limits: FrameLimits,
    ) -> Self {
        Self {
            hub,
            documents,
            presence,
            metrics,
            limits,
        }
    }

    /// Handles one text frame. Malformed frames are answered with an
    /// `error` message and otherwise skipped.
    pub async fn handle_text(&self, conn: &Arc<Connection>, raw: &str) {
        self.metrics.message_received();

        let parsed = validate_inbound(raw)
            .and_then(|_| serde_json::from_str::<Message>(raw).map_err(Into::into));
        let msg = match parsed {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "Malformed frame skipped");
                self.reply(conn, builder::error(None, 400, "invalid message"));
                return;
            }
        };

        if let Err(e) = self.limits.check(raw, msg.kind) {
            warn!(conn_id = %conn.id, kind = ?msg.kind, size = raw.len(), "Oversized frame rejected");
            self.reply(conn, ProtocolError::from_app(msg.id, &e).to_message());
            return;
        }

        match ClientMessage::try_from(msg) {
            Ok(request) => self.dispatch(conn, request).await,
            Err(e) => {
                debug!(conn_id = %conn.id, code = e.code, error = %e.message, "Protocol error");
                self.reply(conn, e.to_message());
            }
        }
    }

    /// Executes a decoded request.
    pub async fn dispatch(&self, conn: &Arc<Connection>, msg: ClientMessage) {
        let id = msg.id;
        match msg.request {
            Request::Ping => {
                conn.touch_heartbeat().await;
                self.reply(conn, builder::pong(id));
            }
            Request::Pong => {
                conn.touch_heartbeat().await;
            }
            Request::Subscribe(target) => {
                let channel = target.channel_name();
                match self.hub.subscribe(conn.id, &channel).await {
                    Ok(true) => self.reply(conn, builder::subscribed(id, &channel)),
                    Ok(false) => self.reply(conn, not_registered(id)),
                    Err(e) => self.reply(conn, ProtocolError::from_app(id, &e).to_message()),
                }
            }
            Request::Unsubscribe(target) => {
                let channel = target.channel_name();
                match self.hub.unsubscribe(conn.id, &channel).await {
                    Ok(true) => self.reply(conn, builder::unsubscribed(id, &channel)),
                    Ok(false) => self.reply(conn, not_registered(id)),
                    Err(e) => self.reply(conn, ProtocolError::from_app(id, &e).to_message()),
                }
            }
            Request::Query(query) => {
                let target = query.target.clone();
                let reply = match self.documents.query(&context(conn), query).await {
                    Ok(resp) => builder::query_response(id, &target, resp.data),
                    Err(e) => ProtocolError::from_app(id, &e).to_message(),
                };
                self.reply(conn, reply);
            }
            Request::Submit(submit) => {
                let (collection, document) = (submit.collection.clone(), submit.document.clone());
                let reply = match self.documents.submit(&context(conn), submit).await {
                    Ok(resp) => builder::submit_response(id, &collection, &document, resp.data),
                    Err(e) => ProtocolError::from_app(id, &e).to_message(),
                };
                self.reply(conn, reply);
            }
            Request::Presence(update) => {
                if let Err(e) = self.presence.update(&context(conn), update).await {
                    self.reply(conn, ProtocolError::from_app(id, &e).to_message());
                }
            }
            Request::Cursor(update) => {
                if let Err(e) = self.presence.update_cursor(&context(conn), update).await {
                    self.reply(conn, ProtocolError::from_app(id, &e).to_message());
                }
            }
            Request::Unsupported(kind) => {
                warn!(conn_id = %conn.id, kind = ?kind, "Unsupported message type dropped");
            }
        }
    }

    /// Releases what a retired connection left behind with collaborators.
    pub async fn handle_close(&self, conn: &Connection) {
        if let Err(e) = self.presence.disconnect(&context(conn)).await {
            warn!(conn_id = %conn.id, error = %e, "Presence release failed");
        }
    }

    fn reply(&self, conn: &Connection, msg: Message) {
        let kind: MessageKind = msg.kind;
        if let Err(e) = conn.try_enqueue(msg) {
            self.metrics.message_dropped();
            error!(conn_id = %conn.id, kind = ?kind, error = %e, "Reply dropped");
        }
    }
}

fn not_registered(id: Option<String>) -> Message {
    builder::error(id, 404, "connection is not registered")
}

fn context(conn: &Connection) -> RequestContext {
    RequestContext {
        conn_id: conn.id,
        user_id: conn.user_id.clone(),
        session_id: conn.session_id.clone(),
    }
}
