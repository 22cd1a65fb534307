//! HTTP endpoint tests through `tower::ServiceExt::oneshot`.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use tokio::sync::mpsc;

use tablehub_core::config::RealtimeConfig;
use tablehub_realtime::message::types::{Message, MessageKind};
use tablehub_realtime::protocol::collaborator::RequestContext;
use tablehub_realtime::{Connection, RealtimeEngine};

use helpers::{engine, request, router};

async fn join(
    engine: &RealtimeEngine,
    user_id: &str,
    channels: &[&str],
) -> (Arc<Connection>, mpsc::Receiver<Message>) {
    let (conn, rx) = Connection::new(user_id, None, 16);
    engine.hub.register(conn.clone()).await.unwrap();
    for channel in channels {
        engine.hub.subscribe(conn.id, channel).await.unwrap();
    }
    (conn, rx)
}

fn context(conn: &Connection) -> RequestContext {
    RequestContext {
        conn_id: conn.id,
        user_id: conn.user_id.clone(),
        session_id: Some("s1".into()),
    }
}

async fn next(rx: &mut mpsc::Receiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("message not delivered in time")
        .expect("queue closed")
}

#[tokio::test]
async fn test_health() {
    let app = router(engine(RealtimeConfig::default(), None).await);

    let response = request(&app, "GET", "/api/health", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["success"], true);
    assert_eq!(response.body["data"]["status"], "ok");
    assert_eq!(response.body["data"]["version"], env!("CARGO_PKG_VERSION"));
    assert!(response.body["data"]["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_detailed_health_reports_hub_and_stopping() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let _conn = join(&engine, "u1", &["table1"]).await;

    let response = request(&app, "GET", "/api/health/detailed", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let data = &response.body["data"];
    assert_eq!(data["status"], "ok");
    assert_eq!(data["hub"]["total_connections"], 1);
    assert_eq!(data["hub"]["total_channels"], 1);
    assert!(data["broker"].is_null());

    engine.shutdown().await.unwrap();
    let response = request(&app, "GET", "/api/health/detailed", None).await;
    assert_eq!(response.body["data"]["status"], "stopping");
    assert!(response.body["data"]["hub"].is_null());
}

#[tokio::test]
async fn test_stats() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let _a = join(&engine, "u1", &["table1"]).await;
    let _b = join(&engine, "u1", &["table2"]).await;

    let response = request(&app, "GET", "/api/v1/ws/stats", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let data = &response.body["data"];
    assert_eq!(data["connections"], 2);
    assert_eq!(data["users"], 1);
    assert_eq!(data["channels"], 2);
    assert_eq!(data["metrics"]["connections_opened"], 2);
    assert!(data.get("broker").is_none());
}

#[tokio::test]
async fn test_broadcast_channel_honours_exclude() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (_a, mut rx_a) = join(&engine, "u1", &["table1"]).await;
    let (b, mut rx_b) = join(&engine, "u2", &["table1"]).await;

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/broadcast/channel",
        Some(json!({
            "channel": "table1",
            "message": { "type": "notification", "data": { "text": "hi" } },
            "exclude": [b.id],
        })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["targets"], json!(["table1"]));

    let msg = next(&mut rx_a).await;
    assert_eq!(msg.kind, MessageKind::Notification);
    assert_eq!(msg.data, Some(json!({ "text": "hi" })));

    engine.hub.snapshot().await.unwrap();
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn test_broadcast_user() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (_a, mut rx_a) = join(&engine, "u1", &[]).await;
    let (_b, mut rx_b) = join(&engine, "u1", &[]).await;

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/broadcast/user",
        Some(json!({ "user_id": "u1", "message": { "type": "notification" } })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(next(&mut rx_a).await.kind, MessageKind::Notification);
    assert_eq!(next(&mut rx_b).await.kind, MessageKind::Notification);
}

#[tokio::test]
async fn test_publish_record_reaches_both_channels() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (_t, mut table_rx) = join(&engine, "u1", &["record_tbl1"]).await;
    let (_d, mut doc_rx) = join(&engine, "u2", &["record_tbl1.rec1"]).await;

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/publish/record",
        Some(json!({
            "table_id": "tbl1",
            "record_id": "rec1",
            "operation": [{ "p": ["f1"], "oi": 1 }],
        })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body["data"]["targets"],
        json!(["record_tbl1", "record_tbl1.rec1"])
    );

    for rx in [&mut table_rx, &mut doc_rx] {
        let op = next(rx).await;
        assert_eq!(op.kind, MessageKind::Op);
        assert_eq!(op.collection.as_deref(), Some("record_tbl1"));
        assert_eq!(op.document.as_deref(), Some("rec1"));
        assert_eq!(op.data.unwrap()["op"], json!([{ "p": ["f1"], "oi": 1 }]));
    }
}

#[tokio::test]
async fn test_publish_document_and_table_meta() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (_c, mut coll_rx) = join(&engine, "u1", &["table1"]).await;
    let (_m, mut meta_rx) = join(&engine, "u2", &["table_tbl1.meta"]).await;

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/publish/document",
        Some(json!({ "collection": "table1", "operation": [] })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["targets"], json!(["table1"]));
    assert_eq!(next(&mut coll_rx).await.kind, MessageKind::Op);

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/publish/table-meta",
        Some(json!({ "table_id": "tbl1" })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let op = next(&mut meta_rx).await;
    assert_eq!(op.collection.as_deref(), Some("table_tbl1"));
    assert_eq!(op.document.as_deref(), Some("meta"));
}

#[tokio::test]
async fn test_system_message_reaches_everyone() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (_a, mut rx_a) = join(&engine, "u1", &[]).await;
    let (_b, mut rx_b) = join(&engine, "u2", &["table1"]).await;

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/broadcast/system",
        Some(json!({ "message": "restart at noon", "level": "warning" })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);

    for rx in [&mut rx_a, &mut rx_b] {
        let data = next(rx).await.data.unwrap();
        assert_eq!(data["message"], "restart at noon");
        assert_eq!(data["level"], "warning");
    }
}

#[tokio::test]
async fn test_invalid_requests_are_400() {
    let app = router(engine(RealtimeConfig::default(), None).await);

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/publish/document",
        Some(json!({ "collection": "", "operation": [] })),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "VALIDATION");

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/broadcast/channel",
        Some(json!({ "channel": " ", "message": { "type": "op" } })),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    for (path, body) in [
        ("record", json!({ "table_id": "tbl1", "record_id": "", "operation": [] })),
        ("view", json!({ "table_id": "tbl1", "view_id": " ", "operation": [] })),
        ("field", json!({ "table_id": "tbl1", "field_id": "", "operation": [] })),
        ("record", json!({ "table_id": "", "record_id": "rec1", "operation": [] })),
        ("table-meta", json!({ "table_id": "" })),
    ] {
        let uri = format!("/api/v1/ws/publish/{path}");
        let response = request(&app, "POST", &uri, Some(body.clone())).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{path}: {body}");
        assert_eq!(response.body["error"], "VALIDATION");
    }

    let response = request(&app, "DELETE", "/api/v1/ws/connections/not-a-uuid", None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = request(&app, "GET", "/api/v1/ws/socket", None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["message"], "user_id is required");

    let response = request(&app, "GET", "/api/v1/ws/socket?user_id=u1", None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_presence_list() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (conn, _rx) = Connection::new("u1", None, 16);
    engine
        .presence
        .upsert("table1", &context(&conn), json!({ "cursor": 4 }));

    let response = request(&app, "GET", "/api/v1/ws/presence/table1", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let data = &response.body["data"];
    assert_eq!(data["collection"], "table1");
    assert_eq!(data["entries"][0]["user_id"], "u1");
    assert_eq!(data["entries"][0]["data"], json!({ "cursor": 4 }));

    let response = request(&app, "GET", "/api/v1/ws/presence/empty", None).await;
    assert_eq!(response.body["data"]["entries"], json!([]));
}

#[tokio::test]
async fn test_broker_failure_is_503() {
    let broker = tablehub_realtime::bridge::MemoryBroker::new(16);
    let engine = engine(RealtimeConfig::default(), Some((&broker, "node-a"))).await;
    let app = router(engine.clone());
    let (_a, mut rx) = join(&engine, "u1", &["table1"]).await;
    engine.bridge().unwrap().close().await.unwrap();

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/broadcast/channel",
        Some(json!({ "channel": "table1", "message": { "type": "op" } })),
    )
    .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(next(&mut rx).await.kind, MessageKind::Op);
}

#[tokio::test]
async fn test_publish_bulk_routes_each_kind() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (_r, mut record_rx) = join(&engine, "u1", &["record_tbl1"]).await;
    let (_v, mut view_rx) = join(&engine, "u2", &["view_tbl1.viw1"]).await;
    let (_f, mut field_rx) = join(&engine, "u3", &["field_tbl1"]).await;

    let response = request(
        &app,
        "POST",
        "/api/v1/ws/publish/bulk",
        Some(json!({
            "operations": [
                { "type": "record", "table_id": "tbl1", "document_id": "rec1", "operation": [1] },
                { "type": "view", "table_id": "tbl1", "document_id": "viw1", "operation": [2] },
                { "type": "field", "table_id": "tbl1", "document_id": "fld1", "operation": [3] },
                { "type": "comment", "table_id": "tbl1", "document_id": "c1", "operation": [] },
                { "type": "record", "table_id": "tbl1", "document_id": "", "operation": [] },
            ],
        })),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body["data"],
        json!({ "published": 3, "failed": 0, "skipped": 2 })
    );

    let op = next(&mut record_rx).await;
    assert_eq!(op.document.as_deref(), Some("rec1"));
    assert_eq!(op.data.unwrap()["op"], json!([1]));

    let op = next(&mut view_rx).await;
    assert_eq!(op.collection.as_deref(), Some("view_tbl1"));
    assert_eq!(op.data.unwrap()["op"], json!([2]));

    let op = next(&mut field_rx).await;
    assert_eq!(op.document.as_deref(), Some("fld1"));

    engine.hub.snapshot().await.unwrap();
    assert!(record_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_remove_presence_announces_offline() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (gone, _gone_rx) = join(&engine, "u1", &["table1"]).await;
    let (_peer, mut peer_rx) = join(&engine, "u2", &["table1"]).await;
    engine
        .presence
        .upsert("table1", &context(&gone), json!({ "status": "online" }));

    let response = request(&app, "DELETE", "/api/v1/ws/presence/table1/u1", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["removed"], true);

    let msg = next(&mut peer_rx).await;
    assert_eq!(msg.kind, MessageKind::Presence);
    assert_eq!(msg.collection.as_deref(), Some("table1"));
    assert_eq!(
        msg.data,
        Some(json!({ "user_id": "u1", "presence": { "status": "offline" } }))
    );
    assert!(engine.presence.list("table1").is_empty());

    let response = request(&app, "DELETE", "/api/v1/ws/presence/table1/u1", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["removed"], false);
}

#[tokio::test]
async fn test_cursor_list() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (conn, _rx) = Connection::new("u1", None, 16);
    engine.presence.set_cursor(
        "table1",
        &context(&conn),
        Some("rec1".into()),
        json!({ "row": 2, "col": 1 }),
        None,
    );

    let response = request(&app, "GET", "/api/v1/ws/cursors/table1", None).await;
    assert_eq!(response.status, StatusCode::OK);
    let data = &response.body["data"];
    assert_eq!(data["collection"], "table1");
    assert_eq!(data["cursors"][0]["user_id"], "u1");
    assert_eq!(data["cursors"][0]["document"], "rec1");
    assert_eq!(data["cursors"][0]["position"], json!({ "row": 2, "col": 1 }));
}

#[tokio::test]
async fn test_disconnect_retires_connection() {
    let engine = engine(RealtimeConfig::default(), None).await;
    let app = router(engine.clone());
    let (conn, _rx) = join(&engine, "u1", &["table1"]).await;

    let uri = format!("/api/v1/ws/connections/{}", conn.id);
    let response = request(&app, "DELETE", &uri, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["targets"], json!([conn.id.to_string()]));

    let snapshot = engine.hub.snapshot().await.unwrap();
    assert!(snapshot.connections.is_empty());
    assert!(snapshot.channels.is_empty());
    assert!(conn.is_closed());
}
