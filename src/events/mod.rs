//! # Event Bus
//!
//! Typed publish/subscribe between the session layer and its consumers.
//!
//! ## Components
//! - **Bus**: listener registry keyed by concrete event type, holding
//!   listeners weakly so dropping the last `Arc` unsubscribes
//! - **Trace**: bounded diagnostic log of dispatched events
//! - **Types**: the events the session layer publishes
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use world_session::events::{EventBus, types::WorldReady};
//!
//! let bus = EventBus::new(16);
//! let listener = Arc::new(|event: &WorldReady| println!("ready: {}", event.entity_id));
//! let _registration = bus.register::<WorldReady, _>(&listener);
//!
//! assert_eq!(bus.dispatch(WorldReady { entity_id: "e1".into() }), 1);
//! drop(listener);
//! assert_eq!(bus.dispatch(WorldReady { entity_id: "e1".into() }), 0);
//! ```

pub mod bus;
pub mod trace;
pub mod types;

pub use bus::{global, BusStatsSnapshot, EventBus, Listener, Registration};
pub use trace::EventRecord;
pub use types::Event;
