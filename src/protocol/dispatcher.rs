//! Packet routing state machine.
//!
//! [`route`] is a pure function of `(role, phase, packet type)`. It decides
//! whether a packet is handled inline on the I/O actor, handed to another
//! actor, silently dropped because its phase has not been reached, or
//! rejected as a protocol violation. The role handlers in [`super::client`]
//! and [`super::server`] only ever see accepted packets.

use crate::core::packet::PacketType;
use crate::error::SessionError;
use crate::protocol::connection::Role;
use crate::protocol::phase::HandshakePhase;
use crate::runtime::affinity::Actor;

/// Where an accepted packet is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// On the I/O actor, before the next packet is read
    Inline,
    Defer(Actor),
}

#[derive(Debug)]
pub enum Verdict {
    Accept(Route),
    /// Arrived before its phase; ignored without error
    Drop(&'static str),
    /// Fatal protocol violation
    Reject(SessionError),
}

/// What [`ConnectionActor::receive`](super::connection::ConnectionActor::receive)
/// did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Inline,
    Deferred(Actor),
    Dropped,
}

const NOT_PLAYING: &str = "gameplay packet before playing";
const NOT_LOADED: &str = "world packet before world instantiated";
const NOT_AUTHENTICATED: &str = "packet before authentication";
const HANDSHAKE_PENDING: &str = "entity request during world load";

fn expect(
    phase: HandshakePhase,
    expected: HandshakePhase,
    kind: PacketType,
    route: Route,
) -> Verdict {
    if phase == expected {
        Verdict::Accept(route)
    } else {
        Verdict::Reject(SessionError::OutOfSequence {
            packet: kind.name(),
            phase,
        })
    }
}

fn when(open: bool, route: Route, reason: &'static str) -> Verdict {
    if open {
        Verdict::Accept(route)
    } else {
        Verdict::Drop(reason)
    }
}

fn never(role: Role, kind: PacketType) -> Verdict {
    Verdict::Reject(SessionError::UnexpectedPacket {
        packet: kind.name(),
        role: role.name(),
    })
}

pub fn route(role: Role, phase: HandshakePhase, kind: PacketType) -> Verdict {
    match role {
        Role::Client => route_client(phase, kind),
        Role::Server => route_server(phase, kind),
    }
}

fn route_client(phase: HandshakePhase, kind: PacketType) -> Verdict {
    use HandshakePhase::*;
    use PacketType as P;

    let playing = phase == Playing;
    let loaded = phase >= AwaitingInitialChunks;

    match kind {
        P::Disconnect => Verdict::Accept(Route::Inline),
        P::Heartbeat => when(phase >= AwaitingLoginStatus, Route::Inline, NOT_AUTHENTICATED),

        P::SecretExchange => expect(phase, Connecting, kind, Route::Inline),
        P::LoginStatus => expect(phase, AwaitingLoginStatus, kind, Route::Inline),
        P::StartGame => expect(phase, AwaitingStartGame, kind, Route::Defer(Actor::Main)),
        P::InitialChunksSent => {
            expect(phase, AwaitingInitialChunks, kind, Route::Defer(Actor::Main))
        }

        // Streamed between world creation and the end of the initial load
        P::UpdateChunk | P::SpawnEntity => when(loaded, Route::Defer(Actor::Async), NOT_LOADED),
        P::WorldSettings | P::InterfaceUpdate => {
            when(loaded, Route::Defer(Actor::Main), NOT_LOADED)
        }

        P::MoveEntity | P::HoldingItem => when(playing, Route::Defer(Actor::Ticker), NOT_PLAYING),
        P::UpdateBlock | P::DespawnEntity | P::ContainerUpdate => {
            when(playing, Route::Defer(Actor::Async), NOT_PLAYING)
        }
        P::BreakingBlockProgress => when(playing, Route::Inline, NOT_PLAYING),

        P::LoginRequest
        | P::SecretResponse
        | P::ClientWorldLoaded
        | P::ChunkRequest
        | P::EntityRequest
        | P::ContainerRequest
        | P::ContentRequest
        | P::Unrecognized => never(Role::Client, kind),
    }
}

fn route_server(phase: HandshakePhase, kind: PacketType) -> Verdict {
    use HandshakePhase::*;
    use PacketType as P;

    let playing = phase == Playing;

    match kind {
        P::Disconnect => return Verdict::Accept(Route::Inline),
        P::LoginRequest => return expect(phase, Connecting, kind, Route::Inline),
        P::SecretResponse => return expect(phase, AwaitingSecretResponse, kind, Route::Inline),
        _ => {}
    }

    // Nothing else is handled until the secret is confirmed. World traffic
    // is ignored, anything else is out of sequence.
    if phase < AwaitingLoginStatus {
        return match route_server(Playing, kind) {
            Verdict::Accept(_) if kind.is_gameplay() => Verdict::Drop(NOT_AUTHENTICATED),
            Verdict::Reject(e @ SessionError::UnexpectedPacket { .. }) => Verdict::Reject(e),
            _ => Verdict::Reject(SessionError::OutOfSequence {
                packet: kind.name(),
                phase,
            }),
        };
    }

    match kind {
        P::Heartbeat => Verdict::Accept(Route::Inline),

        P::EntityRequest => match phase {
            AwaitingLoginStatus | Playing => Verdict::Accept(Route::Defer(Actor::Async)),
            _ => Verdict::Drop(HANDSHAKE_PENDING),
        },
        P::ClientWorldLoaded => {
            expect(phase, AwaitingStartGame, kind, Route::Defer(Actor::Async))
        }

        P::MoveEntity | P::HoldingItem => when(playing, Route::Defer(Actor::Ticker), NOT_PLAYING),
        P::UpdateBlock
        | P::ChunkRequest
        | P::ContainerUpdate
        | P::ContainerRequest
        | P::ContentRequest => when(playing, Route::Defer(Actor::Async), NOT_PLAYING),
        P::BreakingBlockProgress => when(playing, Route::Inline, NOT_PLAYING),

        P::SecretExchange
        | P::LoginStatus
        | P::StartGame
        | P::InitialChunksSent
        | P::SpawnEntity
        | P::DespawnEntity
        | P::UpdateChunk
        | P::WorldSettings
        | P::InterfaceUpdate
        | P::Unrecognized => never(Role::Server, kind),

        P::Disconnect | P::LoginRequest | P::SecretResponse => {
            Verdict::Reject(SessionError::OutOfSequence {
                packet: kind.name(),
                phase,
            })
        }
    }
}
