//! # Core Wire Components
//!
//! Packet schema and stream framing.
//!
//! ## Components
//! - **Packet**: protobuf envelope with a `oneof` payload
//! - **Codec**: Tokio codec for framing envelopes over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(varint, 1..=10)] [Envelope(N, protobuf)]
//! ```
//!
//! ## Limits
//! - Maximum frame size is configurable, 8 MiB by default
//! - Length is validated as soon as the prefix is readable, before the body
//!   is buffered

pub mod codec;
pub mod packet;
