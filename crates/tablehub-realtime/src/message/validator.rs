//! Message validation rules.

use tablehub_core::error::AppError;

use super::types::MessageKind;

/// Longest collection or document id accepted in a channel name.
const MAX_CHANNEL_PART_LEN: usize = 256;

/// Size limits applied to inbound frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Limit for any frame.
    pub max_message_bytes: usize,
    /// Limit for control frames (ping, pong, subscribe, unsubscribe).
    pub max_control_message_bytes: usize,
}

impl FrameLimits {
    /// Checks a raw frame against the limit for its kind.
    pub fn check(&self, raw: &str, kind: MessageKind) -> Result<(), AppError> {
        let limit = if kind.is_control() {
            self.max_control_message_bytes
        } else {
            self.max_message_bytes
        };

        if raw.len() > limit {
            return Err(AppError::validation(format!(
                "message exceeds maximum size of {limit} bytes"
            )));
        }
        Ok(())
    }
}

/// Validates the inbound frame is non-empty text.
pub fn validate_inbound(raw: &str) -> Result<(), AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::validation("empty message"));
    }
    Ok(())
}

/// Validates a collection or document id used to build a channel name.
pub fn validate_channel_part(part: &str) -> Result<(), AppError> {
    if part.len() > MAX_CHANNEL_PART_LEN {
        return Err(AppError::validation("channel name too long"));
    }

    if part.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::validation(
            "channel name contains invalid characters",
        ));
    }

    Ok(())
}
