//! Packet envelope and payload messages.
//!
//! The envelope is a protobuf message with a `oneof` payload. Field tags are
//! part of the wire contract and must never be renumbered.
//!
//! ```text
//! Packet {
//!     direction   = 1   CLIENT (client-bound) | SERVER (server-bound)
//!     packet_type = 2   must match the populated payload variant
//!     secret      = 3   session token, required on server-bound traffic
//!     payload     = 10..32 (oneof)
//! }
//! ```

use prost::{Enumeration, Message, Oneof};

use crate::error::{constants, Result, SessionError};

/// Which side a packet is travelling towards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Direction {
    Unspecified = 0,
    /// Client-bound
    Client = 1,
    /// Server-bound
    Server = 2,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Unspecified => "UNSPECIFIED",
            Direction::Client => "CLIENT",
            Direction::Server => "SERVER",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum PacketType {
    Unrecognized = 0,

    // Login
    LoginRequest = 1,
    SecretExchange = 2,
    SecretResponse = 3,
    LoginStatus = 4,
    StartGame = 5,
    ClientWorldLoaded = 6,
    InitialChunksSent = 7,

    // Gameplay
    MoveEntity = 10,
    UpdateBlock = 11,
    SpawnEntity = 12,
    DespawnEntity = 13,
    HoldingItem = 14,
    ContainerUpdate = 15,
    BreakingBlockProgress = 16,
    UpdateChunk = 17,
    ChunkRequest = 18,
    EntityRequest = 19,
    ContainerRequest = 20,

    // Misc
    Disconnect = 30,
    WorldSettings = 31,
    Heartbeat = 32,
    ContentRequest = 33,
    InterfaceUpdate = 34,
}

impl PacketType {
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Unrecognized => "UNRECOGNIZED",
            PacketType::LoginRequest => "LOGIN_REQUEST",
            PacketType::SecretExchange => "SECRET_EXCHANGE",
            PacketType::SecretResponse => "SECRET_RESPONSE",
            PacketType::LoginStatus => "LOGIN_STATUS",
            PacketType::StartGame => "START_GAME",
            PacketType::ClientWorldLoaded => "CLIENT_WORLD_LOADED",
            PacketType::InitialChunksSent => "INITIAL_CHUNKS_SENT",
            PacketType::MoveEntity => "MOVE_ENTITY",
            PacketType::UpdateBlock => "UPDATE_BLOCK",
            PacketType::SpawnEntity => "SPAWN_ENTITY",
            PacketType::DespawnEntity => "DESPAWN_ENTITY",
            PacketType::HoldingItem => "HOLDING_ITEM",
            PacketType::ContainerUpdate => "CONTAINER_UPDATE",
            PacketType::BreakingBlockProgress => "BREAKING_BLOCK_PROGRESS",
            PacketType::UpdateChunk => "UPDATE_CHUNK",
            PacketType::ChunkRequest => "CHUNK_REQUEST",
            PacketType::EntityRequest => "ENTITY_REQUEST",
            PacketType::ContainerRequest => "CONTAINER_REQUEST",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::WorldSettings => "WORLD_SETTINGS",
            PacketType::Heartbeat => "HEARTBEAT",
            PacketType::ContentRequest => "CONTENT_REQUEST",
            PacketType::InterfaceUpdate => "INTERFACE_UPDATE",
        }
    }

    /// World traffic that is ignored, never rejected, when it arrives before
    /// the phase that unlocks it.
    pub fn is_gameplay(self) -> bool {
        matches!(
            self,
            PacketType::MoveEntity
                | PacketType::HoldingItem
                | PacketType::UpdateBlock
                | PacketType::BreakingBlockProgress
                | PacketType::SpawnEntity
                | PacketType::DespawnEntity
                | PacketType::UpdateChunk
                | PacketType::ContainerUpdate
                | PacketType::ChunkRequest
                | PacketType::EntityRequest
                | PacketType::ContainerRequest
                | PacketType::ContentRequest
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum LoginStatusKind {
    UnrecognizedStatus = 0,
    AlreadyLoggedIn = 1,
    FullServer = 2,
    ProceedLogin = 3,
    LoginSuccess = 4,
}

impl LoginStatusKind {
    pub fn name(self) -> &'static str {
        match self {
            LoginStatusKind::UnrecognizedStatus => "unrecognized status",
            LoginStatusKind::AlreadyLoggedIn => "already logged in",
            LoginStatusKind::FullServer => "server is full",
            LoginStatusKind::ProceedLogin => "proceed login",
            LoginStatusKind::LoginSuccess => "login success",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum DespawnReason {
    UnspecifiedReason = 0,
    Killed = 1,
    UnknownEntity = 2,
    ChunkUnloaded = 3,
    PlayerQuit = 4,
    Removed = 5,
}

impl DespawnReason {
    /// Reasons that are part of normal operation and not worth a warning.
    pub fn is_benign(self) -> bool {
        matches!(self, DespawnReason::UnknownEntity | DespawnReason::ChunkUnloaded)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ContentKind {
    UnspecifiedContent = 0,
    WorldSettingsContent = 1,
    ContainerContent = 2,
}

// ---------------------------------------------------------------------------
// Shared structures
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Vector2 {
    #[prost(float, tag = "1")]
    pub x: f32,
    #[prost(float, tag = "2")]
    pub y: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct BlockData {
    #[prost(sint32, tag = "1")]
    pub x: i32,
    #[prost(sint32, tag = "2")]
    pub y: i32,
    /// Empty material is air
    #[prost(string, tag = "3")]
    pub material: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChunkData {
    #[prost(sint32, tag = "1")]
    pub chunk_x: i32,
    #[prost(sint32, tag = "2")]
    pub chunk_y: i32,
    /// Row-major materials, `CHUNK_SIZE * CHUNK_SIZE` entries
    #[prost(string, repeated, tag = "3")]
    pub blocks: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EntitySnapshot {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub position: Option<Vector2>,
    #[prost(message, optional, tag = "4")]
    pub velocity: Option<Vector2>,
    #[prost(float, optional, tag = "5")]
    pub look_angle_deg: Option<f32>,
    #[prost(string, tag = "6")]
    pub holding: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ItemStack {
    #[prost(string, tag = "1")]
    pub material: String,
    #[prost(uint32, tag = "2")]
    pub amount: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SlotUpdate {
    #[prost(uint32, tag = "1")]
    pub index: u32,
    /// `None` clears the slot
    #[prost(message, optional, tag = "2")]
    pub item: Option<ItemStack>,
}

// ---------------------------------------------------------------------------
// Login payloads
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct LoginRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(uint32, tag = "2")]
    pub protocol_version: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SecretExchange {
    #[prost(string, tag = "1")]
    pub secret: String,
    #[prost(string, tag = "2")]
    pub entity_uuid: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SecretResponse {
    #[prost(string, tag = "1")]
    pub secret: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginStatus {
    #[prost(enumeration = "LoginStatusKind", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct WorldBootstrap {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub seed: i64,
    #[prost(message, optional, tag = "3")]
    pub settings: Option<WorldSettings>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StartGame {
    #[prost(message, optional, tag = "1")]
    pub world: Option<WorldBootstrap>,
    #[prost(message, optional, tag = "2")]
    pub controlling: Option<EntitySnapshot>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientWorldLoaded {}

#[derive(Clone, PartialEq, Message)]
pub struct InitialChunksSent {}

// ---------------------------------------------------------------------------
// Gameplay payloads
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct MoveEntity {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(message, optional, tag = "2")]
    pub position: Option<Vector2>,
    #[prost(message, optional, tag = "3")]
    pub velocity: Option<Vector2>,
    #[prost(float, optional, tag = "4")]
    pub look_angle_deg: Option<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateBlock {
    #[prost(message, optional, tag = "1")]
    pub block: Option<BlockData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SpawnEntity {
    #[prost(message, optional, tag = "1")]
    pub entity: Option<EntitySnapshot>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DespawnEntity {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(enumeration = "DespawnReason", tag = "2")]
    pub reason: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct HoldingItem {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub material: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContainerUpdate {
    #[prost(string, tag = "1")]
    pub owner: String,
    #[prost(message, repeated, tag = "2")]
    pub slots: Vec<SlotUpdate>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BreakingBlockProgress {
    #[prost(sint32, tag = "1")]
    pub block_x: i32,
    #[prost(sint32, tag = "2")]
    pub block_y: i32,
    #[prost(float, tag = "3")]
    pub progress: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateChunk {
    #[prost(message, optional, tag = "1")]
    pub chunk: Option<ChunkData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChunkRequest {
    #[prost(sint32, tag = "1")]
    pub chunk_x: i32,
    #[prost(sint32, tag = "2")]
    pub chunk_y: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct EntityRequest {
    #[prost(string, tag = "1")]
    pub uuid: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContainerRequest {
    #[prost(string, tag = "1")]
    pub owner: String,
}

// ---------------------------------------------------------------------------
// Misc payloads
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct Disconnect {
    #[prost(string, tag = "1")]
    pub reason: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct WorldSettings {
    #[prost(float, tag = "1")]
    pub time: f32,
    #[prost(float, tag = "2")]
    pub time_scale: f32,
    #[prost(message, optional, tag = "3")]
    pub spawn: Option<Vector2>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Heartbeat {}

#[derive(Clone, PartialEq, Message)]
pub struct ContentRequest {
    #[prost(enumeration = "ContentKind", tag = "1")]
    pub kind: i32,
    /// Container owner when `kind` is `CONTAINER_CONTENT`
    #[prost(string, tag = "2")]
    pub owner: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct InterfaceUpdate {
    #[prost(string, tag = "1")]
    pub interface_id: String,
    #[prost(bool, tag = "2")]
    pub open: bool,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Oneof)]
pub enum Payload {
    #[prost(message, tag = "10")]
    LoginRequest(LoginRequest),
    #[prost(message, tag = "11")]
    SecretExchange(SecretExchange),
    #[prost(message, tag = "12")]
    SecretResponse(SecretResponse),
    #[prost(message, tag = "13")]
    LoginStatus(LoginStatus),
    #[prost(message, tag = "14")]
    StartGame(StartGame),
    #[prost(message, tag = "15")]
    ClientWorldLoaded(ClientWorldLoaded),
    #[prost(message, tag = "16")]
    InitialChunksSent(InitialChunksSent),
    #[prost(message, tag = "17")]
    MoveEntity(MoveEntity),
    #[prost(message, tag = "18")]
    UpdateBlock(UpdateBlock),
    #[prost(message, tag = "19")]
    SpawnEntity(SpawnEntity),
    #[prost(message, tag = "20")]
    DespawnEntity(DespawnEntity),
    #[prost(message, tag = "21")]
    HoldingItem(HoldingItem),
    #[prost(message, tag = "22")]
    ContainerUpdate(ContainerUpdate),
    #[prost(message, tag = "23")]
    BreakingBlockProgress(BreakingBlockProgress),
    #[prost(message, tag = "24")]
    UpdateChunk(UpdateChunk),
    #[prost(message, tag = "25")]
    ChunkRequest(ChunkRequest),
    #[prost(message, tag = "26")]
    EntityRequest(EntityRequest),
    #[prost(message, tag = "27")]
    ContainerRequest(ContainerRequest),
    #[prost(message, tag = "28")]
    Disconnect(Disconnect),
    #[prost(message, tag = "29")]
    WorldSettings(WorldSettings),
    #[prost(message, tag = "30")]
    Heartbeat(Heartbeat),
    #[prost(message, tag = "31")]
    ContentRequest(ContentRequest),
    #[prost(message, tag = "32")]
    InterfaceUpdate(InterfaceUpdate),
}

impl Payload {
    /// The envelope type this payload must be declared as.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::LoginRequest(_) => PacketType::LoginRequest,
            Payload::SecretExchange(_) => PacketType::SecretExchange,
            Payload::SecretResponse(_) => PacketType::SecretResponse,
            Payload::LoginStatus(_) => PacketType::LoginStatus,
            Payload::StartGame(_) => PacketType::StartGame,
            Payload::ClientWorldLoaded(_) => PacketType::ClientWorldLoaded,
            Payload::InitialChunksSent(_) => PacketType::InitialChunksSent,
            Payload::MoveEntity(_) => PacketType::MoveEntity,
            Payload::UpdateBlock(_) => PacketType::UpdateBlock,
            Payload::SpawnEntity(_) => PacketType::SpawnEntity,
            Payload::DespawnEntity(_) => PacketType::DespawnEntity,
            Payload::HoldingItem(_) => PacketType::HoldingItem,
            Payload::ContainerUpdate(_) => PacketType::ContainerUpdate,
            Payload::BreakingBlockProgress(_) => PacketType::BreakingBlockProgress,
            Payload::UpdateChunk(_) => PacketType::UpdateChunk,
            Payload::ChunkRequest(_) => PacketType::ChunkRequest,
            Payload::EntityRequest(_) => PacketType::EntityRequest,
            Payload::ContainerRequest(_) => PacketType::ContainerRequest,
            Payload::Disconnect(_) => PacketType::Disconnect,
            Payload::WorldSettings(_) => PacketType::WorldSettings,
            Payload::Heartbeat(_) => PacketType::Heartbeat,
            Payload::ContentRequest(_) => PacketType::ContentRequest,
            Payload::InterfaceUpdate(_) => PacketType::InterfaceUpdate,
        }
    }
}

/// The packet envelope: exactly one payload variant matching `packet_type`.
#[derive(Clone, PartialEq, Message)]
pub struct Packet {
    #[prost(enumeration = "Direction", tag = "1")]
    pub direction: i32,
    #[prost(enumeration = "PacketType", tag = "2")]
    pub packet_type: i32,
    #[prost(string, tag = "3")]
    pub secret: String,
    #[prost(
        oneof = "Payload",
        tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32"
    )]
    pub payload: Option<Payload>,
}

impl Packet {
    /// Build an envelope whose declared type matches `payload`.
    pub fn new(direction: Direction, payload: Payload) -> Self {
        Self {
            direction: direction as i32,
            packet_type: payload.packet_type() as i32,
            secret: String::new(),
            payload: Some(payload),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Declared type, rejecting values this build does not know.
    pub fn kind(&self) -> Result<PacketType> {
        match PacketType::try_from(self.packet_type) {
            Ok(PacketType::Unrecognized) | Err(_) => {
                Err(SessionError::UnrecognizedPacket(self.packet_type))
            }
            Ok(kind) => Ok(kind),
        }
    }

    /// Human-readable type name for logs, tolerant of unknown values.
    pub fn name(&self) -> &'static str {
        PacketType::try_from(self.packet_type)
            .map(PacketType::name)
            .unwrap_or(PacketType::Unrecognized.name())
    }

    /// Check the envelope invariants for a packet arriving at `receiver`.
    ///
    /// Returns the declared type when the type is known, the direction names
    /// the receiver and the populated payload matches the declared type.
    pub fn validate(&self, receiver: Direction) -> Result<PacketType> {
        let kind = self.kind()?;

        let actual = Direction::try_from(self.direction).unwrap_or(Direction::Unspecified);
        if actual != receiver {
            return Err(SessionError::DirectionMismatch {
                packet: kind.name(),
                expected: receiver.name(),
                actual: actual.name(),
            });
        }

        match &self.payload {
            None => Err(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD)),
            Some(payload) if payload.packet_type() != kind => {
                Err(SessionError::PayloadMismatch(kind.name()))
            }
            Some(_) => Ok(kind),
        }
    }
}
