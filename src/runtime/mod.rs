//! # Actor Runtime
//!
//! The session layer runs on five independently scheduled actors:
//!
//! | Actor | Scheduling |
//! |-------|------------|
//! | `Io` | tokio tasks reading and writing the transport |
//! | `Async` | dedicated multi-thread runtime, fire-and-forget work |
//! | `Main` | single thread, UI and one-shot confirmations |
//! | `Ticker` | single thread, fixed-step entity mutation |
//! | `Physics` | single thread, body sync |
//!
//! [`affinity`] answers "which actor am I on?" and [`executor`] provides the
//! only supported way to hand work from one actor to another.

pub mod affinity;
pub mod executor;

pub use affinity::Actor;
pub use executor::{ActorRuntime, Executor, Job, ManualExecutor};
