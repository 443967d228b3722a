//! Forward-only handshake phase and one-way flags.
//!
//! Both types are shared across actors without a lock. Neither exposes a way
//! to move backwards: a phase only advances and a flag only sets.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HandshakePhase {
    Connecting = 0,
    AwaitingSecretResponse = 1,
    AwaitingLoginStatus = 2,
    AwaitingStartGame = 3,
    AwaitingInitialChunks = 4,
    Playing = 5,
    Closed = 6,
}

impl HandshakePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HandshakePhase::Connecting,
            1 => HandshakePhase::AwaitingSecretResponse,
            2 => HandshakePhase::AwaitingLoginStatus,
            3 => HandshakePhase::AwaitingStartGame,
            4 => HandshakePhase::AwaitingInitialChunks,
            5 => HandshakePhase::Playing,
            _ => HandshakePhase::Closed,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HandshakePhase::Connecting => "connecting",
            HandshakePhase::AwaitingSecretResponse => "awaiting secret response",
            HandshakePhase::AwaitingLoginStatus => "awaiting login status",
            HandshakePhase::AwaitingStartGame => "awaiting start game",
            HandshakePhase::AwaitingInitialChunks => "awaiting initial chunks",
            HandshakePhase::Playing => "playing",
            HandshakePhase::Closed => "closed",
        }
    }
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free cell holding a [`HandshakePhase`] that can only advance.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(HandshakePhase::Connecting as u8))
    }

    pub fn get(&self) -> HandshakePhase {
        HandshakePhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is strictly later than the current phase.
    /// Returns the phase that was replaced, or `None` if nothing changed.
    pub fn advance(&self, next: HandshakePhase) -> Option<HandshakePhase> {
        let target = next as u8;
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (target > current).then_some(target)
            })
            .ok()
            .map(HandshakePhase::from_u8)
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Unset,
    Set,
}

/// Flag with the single transition `Unset -> Set`.
#[derive(Debug, Default)]
pub struct OneWayFlag(AtomicBool);

impl OneWayFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that performed the transition.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn state(&self) -> FlagState {
        if self.0.load(Ordering::Acquire) {
            FlagState::Set
        } else {
            FlagState::Unset
        }
    }

    pub fn is_set(&self) -> bool {
        self.state() == FlagState::Set
    }
}
