//! # World Collaborators
//!
//! The session layer never owns world data. It drives a [`WorldStore`]
//! through this trait, builds one on the client through a [`WorldFactory`],
//! and flips the visible [`Screen`] through a [`ScreenSlot`].
//!
//! [`memory::MemoryWorld`] and [`SharedScreen`] are small in-memory
//! implementations used by tests and demos.
//!
//! ## Coordinates
//! Blocks use integer world coordinates. A chunk is a `CHUNK_SIZE` square;
//! the chunk of a block is found by floor division, so `(-1, -1)` lies in
//! chunk `(-1, -1)`.

pub mod memory;

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::core::packet::{Vector2, WorldBootstrap};
use crate::error::Result;
use crate::runtime::affinity::{self, Actor};

/// Side length of a square chunk, in blocks.
pub const CHUNK_SIZE: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Block containing this point.
    pub fn block(self) -> BlockLoc {
        BlockLoc::new(self.x.floor() as i32, self.y.floor() as i32)
    }
}

impl From<Vector2> for Vec2 {
    fn from(v: Vector2) -> Self {
        Vec2::new(v.x, v.y)
    }
}

impl From<Vec2> for Vector2 {
    fn from(v: Vec2) -> Self {
        Vector2 { x: v.x, y: v.y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockLoc {
    pub x: i32,
    pub y: i32,
}

impl BlockLoc {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn chunk(self) -> ChunkLoc {
        ChunkLoc::new(self.x.div_euclid(CHUNK_SIZE), self.y.div_euclid(CHUNK_SIZE))
    }

    /// Row-major index inside the owning chunk.
    pub fn index_in_chunk(self) -> usize {
        let lx = self.x.rem_euclid(CHUNK_SIZE);
        let ly = self.y.rem_euclid(CHUNK_SIZE);
        (ly * CHUNK_SIZE + lx) as usize
    }
}

impl fmt::Display for BlockLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkLoc {
    pub x: i32,
    pub y: i32,
}

impl ChunkLoc {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chunks in the square of `radius` around `self`, nearest rows first.
    pub fn around(self, radius: u32) -> Vec<ChunkLoc> {
        let r = radius as i32;
        let mut out = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dy in -r..=r {
            for dx in -r..=r {
                out.push(ChunkLoc::new(self.x + dx, self.y + dy));
            }
        }
        out.sort_by_key(|c| (c.x - self.x).abs().max((c.y - self.y).abs()));
        out
    }

    /// World coordinates of the chunk's lowest block.
    pub fn origin(self) -> BlockLoc {
        BlockLoc::new(self.x * CHUNK_SIZE, self.y * CHUNK_SIZE)
    }
}

impl fmt::Display for ChunkLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub uuid: String,
    pub name: String,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Facing direction, for entities that track one
    pub look_angle_deg: Option<f32>,
    pub holding: Option<String>,
    /// Exists only on the authoritative side and is never sent to clients
    pub server_only: bool,
}

impl EntityState {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, position: Vec2) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            position,
            velocity: Vec2::ZERO,
            look_angle_deg: None,
            holding: None,
            server_only: false,
        }
    }
}

/// Full content of one chunk. Row-major, `CHUNK_SIZE * CHUNK_SIZE` materials,
/// empty string for air.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSnapshot {
    pub location: ChunkLoc,
    pub blocks: Vec<String>,
}

impl ChunkSnapshot {
    pub fn empty(location: ChunkLoc) -> Self {
        Self {
            location,
            blocks: vec![String::new(); (CHUNK_SIZE * CHUNK_SIZE) as usize],
        }
    }

    pub fn block(&self, loc: BlockLoc) -> Option<&str> {
        if loc.chunk() != self.location {
            return None;
        }
        self.blocks.get(loc.index_in_chunk()).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStack {
    pub material: String,
    pub amount: u32,
}

/// One slot of a container diff. `None` empties the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub index: u32,
    pub item: Option<ItemStack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldInfo {
    pub name: String,
    pub seed: i64,
    pub time: f32,
    pub time_scale: f32,
    pub spawn: Vec2,
}

/// Authoritative or replicated world state.
///
/// Implementations must be safe to call from any actor except where a method
/// says otherwise.
pub trait WorldStore: Send + Sync {
    fn info(&self) -> WorldInfo;

    fn get_entity(&self, uuid: &str) -> Option<EntityState>;

    fn entities(&self) -> Vec<EntityState>;

    /// The entity controlled by `username`, if it already exists.
    fn player_entity(&self, username: &str) -> Option<EntityState>;

    /// Insert or replace.
    fn update_entity(&self, entity: EntityState) -> Result<()>;

    fn remove_entity(&self, uuid: &str) -> Option<EntityState>;

    /// Load the entity `uuid` controlled by `username`, creating it at the
    /// spawn point if it does not exist.
    fn load_entity(&self, uuid: &str, username: &str) -> Result<EntityState>;

    fn is_chunk_loaded(&self, chunk: ChunkLoc) -> bool;

    fn get_chunk(&self, chunk: ChunkLoc) -> Option<ChunkSnapshot>;

    /// Replace the full content of a chunk, loading it if needed.
    fn replace_chunk(&self, chunk: ChunkSnapshot) -> Result<()>;

    fn block(&self, loc: BlockLoc) -> Option<String>;

    /// Fails if the owning chunk is not loaded.
    fn set_block(&self, loc: BlockLoc, material: &str) -> Result<()>;

    fn container(&self, owner: &str) -> Option<Vec<Option<ItemStack>>>;

    /// Fails without applying anything if a slot lies outside the container.
    fn apply_container_diff(&self, owner: &str, changes: &[SlotChange]) -> Result<()>;

    fn apply_settings(&self, time: f32, time_scale: f32, spawn: Vec2);

    /// Push the entity's state into its physics body. Physics actor only.
    fn sync_body(&self, uuid: &str) -> Result<()>;

    /// Persist. Called when a player session ends on the server.
    fn save(&self) -> Result<()>;
}

/// Builds the client's world from the server's bootstrap.
pub type WorldFactory =
    Arc<dyn Fn(&WorldBootstrap) -> Result<Arc<dyn WorldStore>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Connecting,
    LoggingIn,
    Loading,
    InGame,
    Disconnected { reason: String },
}

/// The mutable "current screen" of a client.
pub trait ScreenSlot: Send + Sync {
    fn show(&self, screen: Screen) -> Result<()>;

    fn current(&self) -> Screen;
}

/// Screen slot that only accepts changes from the Main actor.
#[derive(Debug)]
pub struct SharedScreen {
    screen: RwLock<Screen>,
}

impl SharedScreen {
    pub fn new() -> Self {
        Self {
            screen: RwLock::new(Screen::Connecting),
        }
    }
}

impl Default for SharedScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSlot for SharedScreen {
    fn show(&self, screen: Screen) -> Result<()> {
        affinity::require_actor(Actor::Main)?;
        if let Ok(mut current) = self.screen.write() {
            *current = screen;
        }
        Ok(())
    }

    fn current(&self) -> Screen {
        self.screen
            .read()
            .map(|s| s.clone())
            .unwrap_or(Screen::Connecting)
    }
}
