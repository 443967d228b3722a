//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;
use tracing::Level;
use world_session::config::{HeartbeatConfig, SessionConfig, SyncConfig, TransportConfig};

#[test]
fn test_default_config_validates() {
    let config = SessionConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let config = SessionConfig::default_with_overrides(|c| {
        c.server.address = "not-an-address".to_string();
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_client_address() {
    let config = SessionConfig::default_with_overrides(|c| c.client.address.clear());
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Client address cannot be empty")));
}

#[test]
fn test_zero_max_players() {
    let config = SessionConfig::default_with_overrides(|c| c.server.max_players = 0);
    assert!(config.validate().iter().any(|e| e.contains("Max players")));
}

#[test]
fn test_view_radius_limit() {
    let config = SessionConfig::default_with_overrides(|c| c.server.view_radius = 64);
    assert!(config.validate().iter().any(|e| e.contains("View radius")));
}

#[test]
fn test_heartbeat_bounds() {
    let fast = HeartbeatConfig {
        interval: Duration::from_millis(1),
        ..HeartbeatConfig::default()
    };
    assert!(fast.validate().iter().any(|e| e.contains("too short")));

    let never_dead = HeartbeatConfig {
        max_missed: 0,
        ..HeartbeatConfig::default()
    };
    assert!(never_dead
        .validate()
        .iter()
        .any(|e| e.contains("Max missed heartbeats")));
}

#[test]
fn test_negative_correction_threshold() {
    let sync = SyncConfig {
        correction_threshold_sq: -1.0,
        ..SyncConfig::default()
    };
    assert!(sync.validate().iter().any(|e| e.contains("Correction threshold")));

    let nan = SyncConfig {
        correction_threshold_sq: f32::NAN,
        ..SyncConfig::default()
    };
    assert!(!nan.validate().is_empty());
}

#[test]
fn test_zero_ttls() {
    let sync = SyncConfig {
        breaking_progress_ttl: Duration::ZERO,
        request_ttl: Duration::ZERO,
        ..SyncConfig::default()
    };
    assert_eq!(sync.validate().len(), 2);
}

#[test]
fn test_transport_limits() {
    let tiny = TransportConfig {
        max_packet_size: 16,
        ..TransportConfig::default()
    };
    assert!(tiny.validate().iter().any(|e| e.contains("too small")));

    let versionless = TransportConfig {
        protocol_version: 0,
        ..TransportConfig::default()
    };
    assert!(versionless
        .validate()
        .iter()
        .any(|e| e.contains("Protocol version")));
}

#[test]
fn test_validate_strict_lists_every_error() {
    let config = SessionConfig::default_with_overrides(|c| {
        c.server.max_players = 0;
        c.transport.protocol_version = 0;
    });

    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Max players"));
    assert!(err.contains("Protocol version"));
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = SessionConfig::from_toml(
        r#"
        [server]
        address = "0.0.0.0:4000"
        max_players = 4

        [heartbeat]
        interval = 500
        max_missed = 4

        [logging]
        log_level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.server.address, "0.0.0.0:4000");
    assert_eq!(config.server.max_players, 4);
    assert_eq!(config.server.view_radius, 2);
    assert_eq!(config.liveness_timeout(), Duration::from_secs(2));
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!((config.sync.correction_threshold_sq - 0.25).abs() < f32::EPSILON);
}

#[test]
fn test_example_config_parses_back() {
    let example = SessionConfig::example_config();
    let parsed = SessionConfig::from_toml(&example).unwrap();
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.heartbeat.max_missed, 10);
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = SessionConfig::from_toml("[server\naddress = ").unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}
