//! WebSocket upgrade handler and the per-connection reader and writer tasks.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use tablehub_core::error::AppError;
use tablehub_realtime::message::types::Message;
use tablehub_realtime::{Connection, RealtimeEngine};

use crate::dto::request::WsParams;
use crate::state::AppState;

/// Header carrying the user id when it is not in the query string.
pub const USER_ID_HEADER: &str = "x-user-id";

/// WebSocket upgrade: `GET /api/v1/ws/socket?user_id=..&session_id=..`
///
/// The user id is resolved by the identity provider in front of this
/// service and trusted as given. It may come from the `user_id` query
/// parameter or the `X-User-ID` header; without it the request fails
/// with 400 before any upgrade.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let user_id = resolve_user_id(&params, &headers)
        .ok_or_else(|| AppError::validation("user_id is required"))?;

    let ws = ws.map_err(|e| AppError::validation(format!("WebSocket upgrade failed: {e}")))?;

    if state.realtime.is_stopped() {
        return Err(AppError::service_unavailable("server is shutting down"));
    }

    let max_bytes = state.realtime.config().max_message_bytes;
    let engine = Arc::clone(&state.realtime);
    let session_id = params.session_id.filter(|s| !s.is_empty());

    Ok(ws
        .max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| handle_socket(engine, user_id, session_id, socket)))
}

fn resolve_user_id(params: &WsParams, headers: &HeaderMap) -> Option<String> {
    params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .or_else(|| {
            headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|id| !id.is_empty())
        })
        .map(str::to_string)
}

/// Runs an upgraded socket until either side gives up.
async fn handle_socket(
    engine: Arc<RealtimeEngine>,
    user_id: String,
    session_id: Option<String>,
    socket: WebSocket,
) {
    let config = engine.config();
    let (conn, outbound) = Connection::new(user_id, session_id, config.outbound_queue_capacity);

    if let Err(e) = engine.hub.register(Arc::clone(&conn)).await {
        warn!(conn_id = %conn.id, error = %e, "Rejecting WebSocket connection");
        let (mut sink, _) = socket.split();
        let _ = sink.send(WsMessage::Close(None)).await;
        return;
    }

    info!(
        conn_id = %conn.id,
        user_id = %conn.user_id,
        "WebSocket connection established"
    );

    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        Arc::clone(&engine),
        sink,
        outbound,
    ));
    let reader = tokio::spawn(read_loop(Arc::clone(&conn), Arc::clone(&engine), stream));

    let _ = reader.await;
    let _ = writer.await;

    info!(
        conn_id = %conn.id,
        user_id = %conn.user_id,
        duration_secs = (Utc::now() - conn.connected_at).num_seconds(),
        "WebSocket connection closed"
    );
}

/// Reads frames until the peer closes, the read deadline passes, or the
/// hub closes the connection. Always ends by asking the hub to retire it.
async fn read_loop(
    conn: Arc<Connection>,
    engine: Arc<RealtimeEngine>,
    mut stream: SplitStream<WebSocket>,
) {
    let pong_wait = engine.config().pong_wait();
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = tokio::select! {
            _ = conn.closed() => break,
            frame = tokio::time::timeout_at(deadline, stream.next()) => frame,
        };

        let frame = match frame {
            Err(_) => {
                warn!(conn_id = %conn.id, "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.id, error = %e, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => {
                engine.dispatcher.handle_text(&conn, text.as_str()).await;
            }
            WsMessage::Pong(_) => {
                deadline = Instant::now() + pong_wait;
                conn.touch_heartbeat().await;
            }
            WsMessage::Close(_) => break,
            // Pings are answered by the socket itself.
            WsMessage::Ping(_) => {}
            WsMessage::Binary(_) => {
                debug!(conn_id = %conn.id, "Ignoring binary frame");
            }
        }
    }

    if let Err(e) = engine.hub.deregister(conn.id).await {
        debug!(conn_id = %conn.id, error = %e, "Deregister after hub stop");
    }
    conn.close();
    engine.dispatcher.handle_close(&conn).await;
}

/// Writes queued messages and keep-alive pings until the connection is
/// closed or a write fails.
async fn write_loop(
    conn: Arc<Connection>,
    engine: Arc<RealtimeEngine>,
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Message>,
) {
    let config = engine.config();
    let write_wait = config.write_wait();
    let ping_period = config.ping_period();

    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = conn.closed() => {
                while let Ok(msg) = outbound.try_recv() {
                    if !write_message(&conn, &engine, &mut sink, msg, write_wait).await {
                        break;
                    }
                }
                let _ = tokio::time::timeout(write_wait, sink.send(WsMessage::Close(None))).await;
                break;
            }

            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if !write_message(&conn, &engine, &mut sink, msg, write_wait).await {
                    break;
                }
            }

            _ = ping.tick() => {
                if !write_frame(&conn, &mut sink, WsMessage::Ping(Bytes::new()), write_wait).await {
                    break;
                }
            }
        }
    }

    conn.close();
}

async fn write_message(
    conn: &Connection,
    engine: &RealtimeEngine,
    sink: &mut SplitSink<WebSocket, WsMessage>,
    msg: Message,
    write_wait: Duration,
) -> bool {
    let json = match serde_json::to_string(&msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(conn_id = %conn.id, error = %e, "Failed to encode outbound message");
            return true;
        }
    };

    let written = write_frame(conn, sink, WsMessage::Text(json.into()), write_wait).await;
    if written {
        engine.metrics.message_sent();
    }
    written
}

async fn write_frame(
    conn: &Connection,
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
    write_wait: Duration,
) -> bool {
    match tokio::time::timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(conn_id = %conn.id, error = %e, "WebSocket write failed");
            false
        }
        Err(_) => {
            warn!(conn_id = %conn.id, "WebSocket write deadline exceeded");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_id_prefers_query_then_header() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("from-header"));

        let params = WsParams {
            user_id: Some("from-query".into()),
            session_id: None,
        };
        assert_eq!(
            resolve_user_id(&params, &headers).as_deref(),
            Some("from-query")
        );

        let blank = WsParams {
            user_id: Some("  ".into()),
            session_id: None,
        };
        assert_eq!(
            resolve_user_id(&blank, &headers).as_deref(),
            Some("from-header")
        );

        assert!(resolve_user_id(&WsParams::default(), &HeaderMap::new()).is_none());
    }
}
