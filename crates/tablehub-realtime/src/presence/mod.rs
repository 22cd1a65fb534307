//! Presence tracking.

pub mod tracker;

pub use tracker::{CursorEntry, PresenceEntry, PresenceTracker};
