//! Per-client connection state.

pub mod handle;

pub use handle::{Connection, ConnectionId, EnqueueError};
