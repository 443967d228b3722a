//! Thread-affinity classification.
//!
//! The current actor is resolved from, in priority order:
//! 1. a scoped override installed with [`enter`],
//! 2. a tokio task-local installed with [`scope`],
//! 3. a permanent binding installed with [`bind_thread`].
//!
//! Nothing here schedules work; see [`crate::runtime::executor`] for that.

use std::cell::Cell;
use std::fmt;
use std::future::Future;

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Main,
    Physics,
    Ticker,
    Async,
    Io,
    Unknown,
}

impl Actor {
    pub fn name(self) -> &'static str {
        match self {
            Actor::Main => "main",
            Actor::Physics => "physics",
            Actor::Ticker => "ticker",
            Actor::Async => "async",
            Actor::Io => "io",
            Actor::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

thread_local! {
    static OVERRIDE: Cell<Option<Actor>> = const { Cell::new(None) };
    static BOUND: Cell<Option<Actor>> = const { Cell::new(None) };
}

tokio::task_local! {
    static TASK_ACTOR: Actor;
}

/// Classify the calling context.
pub fn current() -> Actor {
    if let Some(actor) = OVERRIDE.with(Cell::get) {
        return actor;
    }
    if let Ok(actor) = TASK_ACTOR.try_with(|actor| *actor) {
        return actor;
    }
    BOUND.with(Cell::get).unwrap_or(Actor::Unknown)
}

/// Fail with [`SessionError::WrongActor`] unless called on `expected`.
pub fn require_actor(expected: Actor) -> Result<()> {
    let actual = current();
    if actual != expected {
        return Err(SessionError::WrongActor { expected, actual });
    }
    Ok(())
}

/// Permanently tag the calling thread. Used by actor threads at startup.
pub fn bind_thread(actor: Actor) {
    BOUND.with(|bound| bound.set(Some(actor)));
}

/// Run `fut` with `actor` as its task-local identity.
pub async fn scope<F: Future>(actor: Actor, fut: F) -> F::Output {
    TASK_ACTOR.scope(actor, fut).await
}

/// Override the calling thread's actor until the guard is dropped.
///
/// Guards nest; dropping one restores whatever was active before it.
#[must_use = "the override ends when the guard is dropped"]
pub fn enter(actor: Actor) -> ActorGuard {
    let previous = OVERRIDE.with(|cell| cell.replace(Some(actor)));
    ActorGuard { previous }
}

pub struct ActorGuard {
    previous: Option<Actor>,
}

impl Drop for ActorGuard {
    fn drop(&mut self) {
        OVERRIDE.with(|cell| cell.set(self.previous));
    }
}
