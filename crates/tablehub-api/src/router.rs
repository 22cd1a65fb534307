//! Route definitions for the TableHub HTTP API.
//!
//! The WebSocket endpoint and the realtime admin endpoints live under
//! `/api/v1/ws`; health checks under `/api/health`.

use axum::Router;
use axum::routing::{delete, get, post};

use crate::handlers;
use crate::state::AppState;

/// Build the router with every route, threading `AppState` through
/// `.with_state(state)`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(health_routes())
        .nest("/v1/ws", realtime_routes());

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(handlers::ws::ws_upgrade))
        .with_state(state)
}

/// Liveness and readiness
fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/detailed", get(handlers::health::health_detailed))
}

/// Socket endpoint, stats, broadcast, publish, presence, connections
fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/socket", get(handlers::ws::ws_upgrade))
        .route("/stats", get(handlers::realtime::stats))
        .route(
            "/broadcast/channel",
            post(handlers::realtime::broadcast_channel),
        )
        .route("/broadcast/user", post(handlers::realtime::broadcast_user))
        .route(
            "/broadcast/system",
            post(handlers::realtime::broadcast_system),
        )
        .route(
            "/publish/document",
            post(handlers::realtime::publish_document),
        )
        .route("/publish/record", post(handlers::realtime::publish_record))
        .route("/publish/view", post(handlers::realtime::publish_view))
        .route("/publish/field", post(handlers::realtime::publish_field))
        .route("/publish/bulk", post(handlers::realtime::publish_bulk))
        .route(
            "/publish/table-meta",
            post(handlers::realtime::publish_table_meta),
        )
        .route(
            "/presence/{collection}",
            get(handlers::realtime::presence),
        )
        .route(
            "/presence/{collection}/{user_id}",
            delete(handlers::realtime::remove_presence),
        )
        .route("/cursors/{collection}", get(handlers::realtime::cursors))
        .route(
            "/connections/{conn_id}",
            delete(handlers::realtime::disconnect),
        )
}
