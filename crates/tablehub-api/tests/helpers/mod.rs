//! Shared test helpers for the HTTP and WebSocket tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use tablehub_api::{AppState, build_app, serve};
use tablehub_core::config::{AppConfig, RealtimeConfig};
use tablehub_core::result::AppResult;
use tablehub_realtime::bridge::MemoryBroker;
use tablehub_realtime::{BrokerAttachment, RealtimeEngine};

/// Client side of a test WebSocket.
pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds an engine, optionally attached to a shared in-memory broker.
pub async fn engine(config: RealtimeConfig, broker: Option<(&MemoryBroker, &str)>) -> Arc<RealtimeEngine> {
    let attachment = broker.map(|(broker, node_id)| {
        let (transport, inbound) = broker.connect(64);
        BrokerAttachment {
            transport: Arc::new(transport),
            inbound,
            node_id: node_id.to_string(),
            channel_prefix: "test:ws".to_string(),
        }
    });
    Arc::new(
        RealtimeEngine::assemble(config, attachment)
            .await
            .expect("engine must start"),
    )
}

/// A server bound to an ephemeral local port.
pub struct TestServer {
    /// Address the server listens on.
    pub addr: SocketAddr,
    /// State shared with the handlers.
    pub state: AppState,
    /// Cancelling starts a graceful shutdown.
    pub shutdown: CancellationToken,
    /// The serving task.
    pub handle: JoinHandle<AppResult<()>>,
}

impl TestServer {
    /// Starts a single-node server with default settings.
    pub async fn start() -> Self {
        Self::start_with(engine(RealtimeConfig::default(), None).await, AppConfig::default()).await
    }

    /// Starts a server around an existing engine.
    pub async fn start_with(engine: Arc<RealtimeEngine>, mut config: AppConfig) -> Self {
        config.server.shutdown_grace_seconds = 2;
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let state = AppState::new(config, engine);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, state.clone(), shutdown.clone()));
        Self {
            addr,
            state,
            shutdown,
            handle,
        }
    }

    /// Opens a WebSocket as `user_id`.
    pub async fn connect(&self, user_id: &str) -> Client {
        let url = format!("ws://{}/api/v1/ws/socket?user_id={}", self.addr, user_id);
        let (client, _) = connect_async(url).await.expect("WebSocket handshake");
        client
    }

    /// Waits until the hub holds `count` connections.
    pub async fn wait_for_connections(&self, count: usize) {
        self.wait_for_connections_within(count, Duration::from_secs(2))
            .await;
    }

    /// Waits up to `limit` until the hub holds `count` connections.
    pub async fn wait_for_connections_within(&self, count: usize, limit: Duration) {
        tokio::time::timeout(limit, async {
            loop {
                let stats = self.state.realtime.service.hub_stats().await.expect("hub running");
                if stats.total_connections == count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count not reached in time");
    }
}

/// Sends a JSON frame.
pub async fn send_json(client: &mut Client, frame: Value) {
    client
        .send(WsMessage::text(frame.to_string()))
        .await
        .expect("send frame");
}

/// Next text frame as JSON, skipping keep-alive frames.
pub async fn next_json(client: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).expect("JSON frame");
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame in time")
}

/// Asserts no text frame arrives for a short while.
pub async fn assert_quiet(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

/// Response captured from a oneshot request.
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Parsed JSON body, or `Null`.
    pub body: Value,
}

/// Sends one request through the router without a listener.
pub async fn request(router: &Router, method: &str, path: &str, body: Option<Value>) -> TestResponse {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let req = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("build request");

    let response = router.clone().oneshot(req).await.expect("send request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    TestResponse { status, body }
}

/// Router around `engine` with default config.
pub fn router(engine: Arc<RealtimeEngine>) -> Router {
    build_app(AppState::new(AppConfig::default(), engine))
}
