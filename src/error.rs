//! # Error Types
//!
//! Error handling for the session layer.
//!
//! Every failure a connection can hit is one variant of [`SessionError`], from
//! low-level framing errors to handshake and liveness failures.
//!
//! ## Error Categories
//! - **Codec Errors**: I/O, protobuf encode/decode, oversized or malformed frames
//! - **Protocol Violations**: unknown types, wrong direction, out-of-sequence
//!   handshake packets, secret mismatch. Always fatal.
//! - **Session Errors**: login rejection, liveness timeout, peer disconnect
//! - **Contract Errors**: wrong actor, authority violations, configuration
//!
//! Fatal errors are routed through a single teardown path, see
//! [`ConnectionActor::fatal`](crate::protocol::connection::ConnectionActor::fatal).
//!
//! ## Example Usage
//! ```rust
//! use world_session::error::{Result, SessionError};
//!
//! fn check_secret(expected: &str, got: &str) -> Result<()> {
//!     if expected != got {
//!         return Err(SessionError::SecretMismatch);
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_secret("s1", "s2").unwrap_err().is_fatal());
//! ```

use std::io;
use thiserror::Error;

use crate::protocol::phase::HandshakePhase;
use crate::runtime::affinity::Actor;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock errors
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire lock on listener registry";
    pub const ERR_WORLD_LOCK: &str = "Failed to acquire lock on world store";

    /// Framing errors
    pub const ERR_INVALID_LENGTH_PREFIX: &str = "Malformed varint length prefix";
    pub const ERR_MISSING_PAYLOAD: &str = "Packet carries no payload";

    /// Handshake errors
    pub const ERR_EMPTY_USERNAME: &str = "Login request has an empty username";
    pub const ERR_USERNAME_TOO_LONG: &str = "Login request username is too long";
    pub const ERR_EMPTY_SECRET: &str = "Secret exchange carries an empty secret";
    pub const ERR_EMPTY_ENTITY: &str = "Secret exchange carries an empty entity id";
    pub const ERR_SESSION_ALREADY_ATTACHED: &str = "Session state is already attached";
    pub const ERR_NO_SESSION: &str = "No session state attached";
    pub const ERR_UNEXPECTED_ENTITY_REQUEST: &str =
        "Expected a request for the controlled entity";
    pub const ERR_NO_WORLD: &str = "No world attached to connection";
    pub const ERR_NO_WORLD_FACTORY: &str = "Client connection has no world factory";

    /// User-facing disconnect reasons
    pub const REASON_STOPPED_RESPONDING: &str = "Peer stopped responding";
    pub const REASON_DISCONNECTED: &str = "Disconnected";
    pub const REASON_CONNECTION_LOST: &str = "Connection closed by peer";
    pub const REASON_SERVER_SHUTDOWN: &str = "Server shutting down";
}

/// SessionError is the error type for all session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Unrecognized packet type: {0}")]
    UnrecognizedPacket(i32),

    #[error("Packet {packet} travels {actual}, expected {expected}")]
    DirectionMismatch {
        packet: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Packet payload does not match declared type {0}")]
    PayloadMismatch(&'static str),

    #[error("Secret mismatch")]
    SecretMismatch,

    #[error("{role} never accepts {packet}")]
    UnexpectedPacket {
        packet: &'static str,
        role: &'static str,
    },

    #[error("Unexpected {packet} while {phase}")]
    OutOfSequence {
        packet: &'static str,
        phase: HandshakePhase,
    },

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Login rejected: {0}")]
    LoginRejected(&'static str),

    #[error("Peer stopped responding")]
    StoppedResponding,

    #[error("Disconnected by peer: {0}")]
    PeerDisconnected(String),

    #[error("Called on {actual} actor, requires {expected}")]
    WrongActor { expected: Actor, actual: Actor },

    #[error("{0} actor is not available")]
    ActorUnavailable(Actor),

    #[error("Authority violation: {0}")]
    AuthorityViolation(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("World error: {0}")]
    WorldError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl SessionError {
    /// Whether this error must tear the connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_)
                | SessionError::Decode(_)
                | SessionError::InvalidFrame(_)
                | SessionError::OversizedPacket(_)
                | SessionError::UnrecognizedPacket(_)
                | SessionError::DirectionMismatch { .. }
                | SessionError::PayloadMismatch(_)
                | SessionError::UnexpectedPacket { .. }
                | SessionError::SecretMismatch
                | SessionError::OutOfSequence { .. }
                | SessionError::HandshakeError(_)
                | SessionError::LoginRejected(_)
                | SessionError::StoppedResponding
        )
    }

    /// Reason string shown to the user and sent in the disconnect notice.
    pub fn user_reason(&self) -> String {
        match self {
            SessionError::StoppedResponding => constants::REASON_STOPPED_RESPONDING.to_string(),
            SessionError::LoginRejected(status) => format!("Login rejected: {status}"),
            SessionError::PeerDisconnected(reason) => reason.clone(),
            other => format!("Protocol error: {other}"),
        }
    }
}

/// Type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;
