//! Response DTOs.

use serde::{Deserialize, Serialize};

use tablehub_realtime::bridge::BrokerHealth;
use tablehub_realtime::hub::HubStats;
use tablehub_realtime::presence::{CursorEntry, PresenceEntry};

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Basic health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` while the engine runs.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_seconds: u64,
}

/// Health check with realtime details.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealthResponse {
    /// `ok`, `degraded` or `stopping`.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_seconds: u64,
    /// Hub counts, absent once the hub has stopped.
    pub hub: Option<HubStats>,
    /// Broker state, absent when the broker is disabled.
    pub broker: Option<BrokerHealth>,
}

/// Acknowledgement of a publish or broadcast request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Channels or users the message was addressed to.
    pub targets: Vec<String>,
}

/// Presence list for one collection.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceResponse {
    /// Collection the entries belong to.
    pub collection: String,
    /// One entry per user.
    pub entries: Vec<PresenceEntry>,
}

/// Cursor list for one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CursorsResponse {
    /// Collection the cursors belong to.
    pub collection: String,
    /// One cursor per user.
    pub cursors: Vec<CursorEntry>,
}

/// Result of removing one user's presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRemovedResponse {
    /// Collection the user left.
    pub collection: String,
    /// User whose entries were removed.
    pub user_id: String,
    /// False when the user had no entry.
    pub removed: bool,
}
