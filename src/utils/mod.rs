//! # Utility Modules
//!
//! Supporting utilities shared by the protocol and event layers.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: Thread-safe observability counters
//! - **TTL Cache**: expiring map for request dedup and breaking progress

pub mod logging;
pub mod metrics;
pub mod ttl_cache;

pub use metrics::{global_metrics, Metrics};
pub use ttl_cache::TtlCache;
