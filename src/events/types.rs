//! Events published by the session layer.

use std::any::Any;
use std::fmt::Debug;

use crate::core::packet::DespawnReason;
use crate::protocol::phase::HandshakePhase;
use crate::world::{BlockLoc, ChunkLoc, Vec2};

/// Anything that can travel over the bus. Listeners match on the exact type.
pub trait Event: Any + Send + Sync + Debug {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The local handshake advanced.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginProgress {
    pub peer: String,
    pub phase: HandshakePhase,
}

/// Initial chunks are loaded and the client is playing.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldReady {
    pub entity_id: String,
}

/// The server overrode a client prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCorrected {
    pub uuid: String,
    pub predicted: Vec2,
    pub authoritative: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpawned {
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDespawned {
    pub uuid: String,
    pub reason: DespawnReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockUpdated {
    pub location: BlockLoc,
    pub material: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReplaced {
    pub location: ChunkLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerChanged {
    pub owner: String,
    pub slots: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceUpdated {
    pub interface_id: String,
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldSettingsChanged {
    pub time: f32,
    pub time_scale: f32,
}

/// A player finished logging in on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerJoined {
    pub username: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLeft {
    pub username: String,
}

/// A connection was torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnected {
    pub peer: String,
    pub reason: String,
    pub fatal: bool,
}

impl Event for LoginProgress {}
impl Event for WorldReady {}
impl Event for EntityCorrected {}
impl Event for EntitySpawned {}
impl Event for EntityDespawned {}
impl Event for BlockUpdated {}
impl Event for ChunkReplaced {}
impl Event for ContainerChanged {}
impl Event for InterfaceUpdated {}
impl Event for WorldSettingsChanged {}
impl Event for PlayerJoined {}
impl Event for PlayerLeft {}
impl Event for Disconnected {}

pub(crate) fn as_any<E: Event>(event: &E) -> &dyn Any {
    event
}
