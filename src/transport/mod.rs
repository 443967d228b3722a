//! # Transport
//!
//! Byte-stream plumbing between a [`ConnectionActor`](crate::protocol::connection::ConnectionActor)
//! and the network. Framing lives in [`crate::core::codec`]; this module only
//! moves frames.

pub mod tcp;

pub use tcp::{attach, connect, listen, serve, ServerContext};
