//! # Session Protocol
//!
//! Handshake, world synchronization and liveness for one connection.
//!
//! ## Components
//! - **Connection**: the per-connection actor and its single teardown path
//! - **Dispatcher**: pure `(role, phase, packet)` routing table
//! - **Client / Server**: role-specific packet handlers
//! - **Handshake**: login validation, secret generation, login status rules
//! - **Heartbeat**: periodic self-send and liveness check
//! - **Sync**: movement reconciliation and wire to world conversions
//! - **Builders**: every outbound packet
//!
//! ## Handshake Phases
//! ```text
//! Connecting ─► AwaitingSecretResponse ─► AwaitingLoginStatus ─► AwaitingStartGame
//!            ─► AwaitingInitialChunks ─► Playing ─► Closed
//! ```
//! The client skips `AwaitingSecretResponse`. Phases only move forward.

pub mod builders;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod handshake;
pub mod heartbeat;
pub mod phase;
pub mod server;
pub mod state;
pub mod sync;

#[cfg(test)]
mod tests;

pub use connection::{ConnectionActor, ConnectionBuilder, Role};
pub use phase::HandshakePhase;
pub use server::SessionRegistry;
pub use state::SharedConnectionState;
