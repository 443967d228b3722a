//! # world-session
//!
//! Session layer for a real-time multiplayer world: a login handshake with a
//! per-session secret, authoritative entity, block and chunk synchronization,
//! heartbeat liveness, a weak-reference event bus and a thread-affinity
//! classifier, over length-prefixed protobuf frames.
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use world_session::config::SessionConfig;
//! use world_session::protocol::ConnectionBuilder;
//! use world_session::runtime::ActorRuntime;
//! use world_session::transport;
//! use world_session::world::memory::MemoryWorld;
//!
//! #[tokio::main]
//! async fn main() -> world_session::error::Result<()> {
//!     let config = Arc::new(SessionConfig::default());
//!     let runtime = Arc::new(ActorRuntime::start_current(2)?);
//!
//!     let builder = ConnectionBuilder::client(config.clone())
//!         .executor(runtime)
//!         .world_factory(MemoryWorld::factory());
//!     let (conn, task) = transport::connect(&config.client, builder).await?;
//!     conn.begin_login("alice")?;
//!
//!     task.await.ok();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod protocol;
pub mod runtime;
pub mod transport;
pub mod utils;
pub mod world;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use events::EventBus;
pub use protocol::{ConnectionActor, ConnectionBuilder, HandshakePhase, Role};
pub use runtime::Actor;
