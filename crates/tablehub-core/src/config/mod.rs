//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a default so an empty file is valid.

pub mod app;
pub mod broker;
pub mod logging;
pub mod realtime;

use serde::{Deserialize, Serialize};

pub use self::app::{CorsConfig, ServerConfig};
pub use self::broker::{BrokerConfig, ReconnectConfig};
pub use self::logging::LoggingConfig;
pub use self::realtime::RealtimeConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Real-time WebSocket settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Cross-process broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `{dir}/default.toml` with an environment-specific overlay
    /// `{dir}/{env}.toml` and environment variables prefixed with `TABLEHUB__`,
    /// then validates the result.
    pub fn load(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TABLEHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        let rt = &self.realtime;

        if rt.outbound_queue_capacity == 0 || rt.hub_queue_capacity == 0 {
            return Err(AppError::configuration(
                "realtime queue capacities must be greater than zero",
            ));
        }

        if rt.ping_period().is_zero() || rt.ping_period() >= rt.pong_wait() {
            return Err(AppError::configuration(format!(
                "ping period ({:?}) must be shorter than pong_wait ({:?})",
                rt.ping_period(),
                rt.pong_wait()
            )));
        }

        if rt.pong_wait() > rt.heartbeat_timeout() {
            return Err(AppError::configuration(format!(
                "pong_wait ({}s) must not exceed heartbeat_timeout ({}s)",
                rt.pong_wait_seconds, rt.heartbeat_timeout_seconds
            )));
        }

        if rt.sweep_interval().is_zero() || rt.presence_cleanup_interval().is_zero() {
            return Err(AppError::configuration(
                "sweep and presence cleanup intervals must be non-zero",
            ));
        }

        if rt.max_control_message_bytes > rt.max_message_bytes {
            return Err(AppError::configuration(
                "max_control_message_bytes must not exceed max_message_bytes",
            ));
        }

        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "json" | "pretty") {
            return Err(AppError::configuration(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            )));
        }

        if self.broker.enabled {
            match self.broker.provider.as_str() {
                "redis" | "memory" => {}
                other => {
                    return Err(AppError::configuration(format!(
                        "unknown broker provider '{other}'"
                    )));
                }
            }
            if self.broker.inbound_buffer == 0 {
                return Err(AppError::configuration(
                    "broker inbound_buffer must be greater than zero",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(src: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(src, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.realtime.outbound_queue_capacity, 256);
        assert_eq!(config.realtime.ping_period().as_secs(), 54);
        assert_eq!(config.broker.channel_prefix, "tablehub:ws");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = from_toml(
            r#"
            [server]
            port = 9000

            [broker]
            enabled = true
            provider = "redis"
            "#,
        );
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.broker.enabled);
        assert_eq!(config.realtime.heartbeat_timeout_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pong_wait_longer_than_heartbeat_timeout_rejected() {
        let mut config = AppConfig::default();
        config.realtime.pong_wait_seconds = 90;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = AppConfig::default();
        config.broker.enabled = true;
        config.broker.provider = "kafka".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_control_limit_above_frame_limit_rejected() {
        let mut config = AppConfig::default();
        config.realtime.max_control_message_bytes = 1 << 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = AppConfig::default();
        config.logging.format = "Pretty".to_string();
        assert!(config.validate().is_ok());
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
