//! # tablehub-realtime
//!
//! Real-time collaboration messaging core for TableHub. Provides:
//!
//! - Per-connection state with a bounded outbound queue
//! - A single-writer hub owning the connection, user and channel indexes
//! - The client wire protocol and its dispatch table
//! - Presence tracking
//! - Cross-process fan-out over Redis pub/sub (or an in-memory broker)

pub mod bridge;
pub mod channel;
pub mod connection;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod service;

pub use connection::handle::Connection;
pub use hub::Hub;
pub use presence::tracker::PresenceTracker;
pub use server::{BrokerAttachment, RealtimeEngine};
pub use service::RealtimeService;
