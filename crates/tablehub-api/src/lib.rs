//! # tablehub-api
//!
//! HTTP surface of TableHub: the WebSocket upgrade endpoint, health checks,
//! and the realtime admin endpoints used by backend services to push
//! changes to connected clients.

pub mod app;
pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::{build_app, run_server, serve};
pub use state::AppState;
