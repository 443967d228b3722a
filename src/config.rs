//! # Configuration Management
//!
//! Centralized configuration for server and client sessions.
//!
//! ## Configuration Sources
//! - TOML files via [`SessionConfig::from_file`]
//! - TOML strings via [`SessionConfig::from_toml`]
//! - Direct instantiation with defaults, optionally through
//!   [`SessionConfig::default_with_overrides`]
//!
//! Durations are written as integer milliseconds. Environment variables are
//! never consulted.
//!
//! ## Liveness
//! A peer is declared dead once `heartbeat.interval * heartbeat.max_missed`
//! passes without a received heartbeat. The defaults give ten seconds.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol version sent in the login request
pub const PROTOCOL_VERSION: u32 = 1;

/// Max allowed frame body size (8 MiB)
pub const MAX_PACKET_SIZE: usize = 8 * 1024 * 1024;

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 32;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_MISSED_HEARTBEATS: u32 = 10;

/// Squared distance under which a client prediction is kept
pub const DEFAULT_CORRECTION_THRESHOLD_SQ: f32 = 0.25;

pub const DEFAULT_BREAKING_PROGRESS_TTL: Duration = Duration::from_millis(250);
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_millis(2000);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| SessionError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| SessionError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| SessionError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Time without a received heartbeat after which the peer is dead.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat.interval * self.heartbeat.max_missed
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.heartbeat.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.events.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:25252")
    pub address: String,

    /// Maximum number of concurrently logged-in players
    pub max_players: usize,

    /// Radius, in chunks, streamed around a joining player
    pub view_radius: u32,

    /// Time allowed for sessions to close during graceful shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:25252"),
            max_players: 20,
            view_radius: 2,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:25252')",
                self.address
            ));
        }

        if self.max_players == 0 {
            errors.push("Max players must be greater than 0".to_string());
        } else if self.max_players > 10_000 {
            errors.push(format!(
                "Max players very high: {} (ensure system resources can support this)",
                self.max_players
            ));
        }

        if self.view_radius > 32 {
            errors.push(format!(
                "View radius too large: {} chunks (maximum: 32)",
                self.view_radius
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:25252"),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '127.0.0.1:25252')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Heartbeat and liveness configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Period of the self-scheduled heartbeat
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Periods without a received heartbeat before the peer is declared dead
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_missed: DEFAULT_MAX_MISSED_HEARTBEATS,
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 10 {
            errors.push("Heartbeat interval too short (minimum: 10ms)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.max_missed == 0 {
            errors.push("Max missed heartbeats must be greater than 0".to_string());
        }

        errors
    }
}

/// Entity, block and chunk synchronization tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Squared distance at or under which a prediction is accepted
    pub correction_threshold_sq: f32,

    /// Lifetime of a block-breaking progress entry without refresh
    #[serde(with = "duration_serde")]
    pub breaking_progress_ttl: Duration,

    /// Window in which a repeated resync request for the same id is suppressed
    #[serde(with = "duration_serde")]
    pub request_ttl: Duration,

    /// Upper bound on tracked ids per dedup set
    pub max_tracked_requests: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            correction_threshold_sq: DEFAULT_CORRECTION_THRESHOLD_SQ,
            breaking_progress_ttl: DEFAULT_BREAKING_PROGRESS_TTL,
            request_ttl: DEFAULT_REQUEST_TTL,
            max_tracked_requests: 1024,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.correction_threshold_sq.is_finite() || self.correction_threshold_sq < 0.0 {
            errors.push(format!(
                "Correction threshold must be a non-negative number, got {}",
                self.correction_threshold_sq
            ));
        }

        if self.breaking_progress_ttl.is_zero() {
            errors.push("Breaking progress TTL cannot be 0".to_string());
        }

        if self.request_ttl.is_zero() {
            errors.push("Request TTL cannot be 0".to_string());
        }

        if self.max_tracked_requests == 0 {
            errors.push("Max tracked requests must be greater than 0".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum allowed frame body size in bytes
    pub max_packet_size: usize,

    /// Version advertised in and required of login requests
    pub protocol_version: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size == 0 {
            errors.push("Max packet size cannot be 0".to_string());
        } else if self.max_packet_size < 1024 {
            errors.push("Max packet size too small (minimum: 1 KB)".to_string());
        } else if self.max_packet_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max packet size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_packet_size
            ));
        }

        if self.protocol_version == 0 {
            errors.push("Protocol version cannot be 0".to_string());
        }

        errors
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the diagnostic event trace; 0 disables it
    pub trace_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            trace_capacity: 256,
        }
    }
}

impl EventsConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.trace_capacity > 1_000_000 {
            errors.push(format!(
                "Event trace capacity too large: {} (maximum: 1,000,000)",
                self.trace_capacity
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("world-session"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SessionConfig::default().validate().is_empty());
    }

    #[test]
    fn test_liveness_timeout_is_ten_periods() {
        let config = SessionConfig::default();
        assert_eq!(config.liveness_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = SessionConfig::from_toml(
            r#"
            [heartbeat]
            interval = 250
            max_missed = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.heartbeat.interval, Duration::from_millis(250));
        assert_eq!(config.sync.breaking_progress_ttl, Duration::from_millis(250));
        assert_eq!(config.transport.max_packet_size, MAX_PACKET_SIZE);
    }
}
