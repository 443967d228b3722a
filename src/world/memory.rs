//! In-memory [`WorldStore`].
//!
//! Good enough to host a server in tests and to replicate a world on a
//! client. Terrain is flat: stone below `y = 0`, air above.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::core::packet::WorldBootstrap;
use crate::error::{constants, Result, SessionError};
use crate::runtime::affinity::{self, Actor};
use crate::world::{
    BlockLoc, ChunkLoc, ChunkSnapshot, EntityState, ItemStack, SlotChange, Vec2, WorldFactory,
    WorldInfo, WorldStore, CHUNK_SIZE,
};

/// Slots given to a freshly created player container.
pub const PLAYER_CONTAINER_SLOTS: usize = 10;

fn lock_err<T>(_: T) -> SessionError {
    SessionError::WorldError(constants::ERR_WORLD_LOCK.to_string())
}

#[derive(Debug)]
pub struct MemoryWorld {
    info: RwLock<WorldInfo>,
    entities: RwLock<HashMap<String, EntityState>>,
    chunks: RwLock<HashMap<ChunkLoc, ChunkSnapshot>>,
    containers: RwLock<HashMap<String, Vec<Option<ItemStack>>>>,
    /// Physics-side mirror of entity positions
    bodies: RwLock<HashMap<String, Vec2>>,
    saves: AtomicU64,
}

impl MemoryWorld {
    pub fn new(info: WorldInfo) -> Self {
        Self {
            info: RwLock::new(info),
            entities: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            containers: RwLock::new(HashMap::new()),
            bodies: RwLock::new(HashMap::new()),
            saves: AtomicU64::new(0),
        }
    }

    /// A world with flat terrain generated for every chunk within `radius`
    /// of the origin.
    pub fn flat(name: &str, seed: i64, radius: u32) -> Self {
        let world = Self::new(WorldInfo {
            name: name.to_string(),
            seed,
            time: 0.0,
            time_scale: 1.0,
            spawn: Vec2::new(0.5, 0.0),
        });
        if let Ok(mut chunks) = world.chunks.write() {
            for loc in ChunkLoc::new(0, 0).around(radius) {
                chunks.insert(loc, flat_chunk(loc));
            }
        }
        world
    }

    /// Empty replica built from a server bootstrap.
    pub fn from_bootstrap(bootstrap: &WorldBootstrap) -> Self {
        let settings = bootstrap.settings.clone().unwrap_or_default();
        Self::new(WorldInfo {
            name: bootstrap.name.clone(),
            seed: bootstrap.seed,
            time: settings.time,
            time_scale: settings.time_scale,
            spawn: settings.spawn.map(Vec2::from).unwrap_or_default(),
        })
    }

    /// Client factory producing [`MemoryWorld`] replicas.
    pub fn factory() -> WorldFactory {
        Arc::new(|bootstrap: &WorldBootstrap| {
            let world: Arc<dyn WorldStore> = Arc::new(MemoryWorld::from_bootstrap(bootstrap));
            Ok(world)
        })
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn body_position(&self, uuid: &str) -> Option<Vec2> {
        self.bodies.read().ok()?.get(uuid).copied()
    }

    pub fn loaded_chunks(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }
}

fn flat_chunk(location: ChunkLoc) -> ChunkSnapshot {
    let mut chunk = ChunkSnapshot::empty(location);
    let origin = location.origin();
    for ly in 0..CHUNK_SIZE {
        for lx in 0..CHUNK_SIZE {
            let loc = BlockLoc::new(origin.x + lx, origin.y + ly);
            if loc.y < 0 {
                chunk.blocks[loc.index_in_chunk()] = "stone".to_string();
            }
        }
    }
    chunk
}

impl WorldStore for MemoryWorld {
    fn info(&self) -> WorldInfo {
        self.info
            .read()
            .map(|i| i.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn get_entity(&self, uuid: &str) -> Option<EntityState> {
        self.entities.read().ok()?.get(uuid).cloned()
    }

    fn entities(&self) -> Vec<EntityState> {
        self.entities
            .read()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    fn player_entity(&self, username: &str) -> Option<EntityState> {
        self.entities
            .read()
            .ok()?
            .values()
            .find(|e| !e.server_only && e.name == username)
            .cloned()
    }

    fn update_entity(&self, entity: EntityState) -> Result<()> {
        self.entities
            .write()
            .map_err(lock_err)?
            .insert(entity.uuid.clone(), entity);
        Ok(())
    }

    fn remove_entity(&self, uuid: &str) -> Option<EntityState> {
        if let Ok(mut bodies) = self.bodies.write() {
            bodies.remove(uuid);
        }
        self.entities.write().ok()?.remove(uuid)
    }

    fn load_entity(&self, uuid: &str, username: &str) -> Result<EntityState> {
        if let Some(existing) = self.get_entity(uuid) {
            return Ok(existing);
        }

        let spawn = self.info().spawn;
        let entity = EntityState {
            look_angle_deg: Some(0.0),
            ..EntityState::new(uuid, username, spawn)
        };
        self.update_entity(entity.clone())?;
        self.containers
            .write()
            .map_err(lock_err)?
            .entry(entity.uuid.clone())
            .or_insert_with(|| vec![None; PLAYER_CONTAINER_SLOTS]);

        debug!(username, entity = %entity.uuid, "Created player entity");
        Ok(entity)
    }

    fn is_chunk_loaded(&self, chunk: ChunkLoc) -> bool {
        self.chunks
            .read()
            .map(|c| c.contains_key(&chunk))
            .unwrap_or(false)
    }

    fn get_chunk(&self, chunk: ChunkLoc) -> Option<ChunkSnapshot> {
        self.chunks.read().ok()?.get(&chunk).cloned()
    }

    fn replace_chunk(&self, chunk: ChunkSnapshot) -> Result<()> {
        if chunk.blocks.len() != (CHUNK_SIZE * CHUNK_SIZE) as usize {
            return Err(SessionError::WorldError(format!(
                "Chunk {} has {} blocks",
                chunk.location,
                chunk.blocks.len()
            )));
        }
        self.chunks
            .write()
            .map_err(lock_err)?
            .insert(chunk.location, chunk);
        Ok(())
    }

    fn block(&self, loc: BlockLoc) -> Option<String> {
        let chunks = self.chunks.read().ok()?;
        chunks.get(&loc.chunk())?.block(loc).map(str::to_string)
    }

    fn set_block(&self, loc: BlockLoc, material: &str) -> Result<()> {
        let mut chunks = self.chunks.write().map_err(lock_err)?;
        let chunk = chunks
            .get_mut(&loc.chunk())
            .ok_or_else(|| SessionError::WorldError(format!("Chunk {} not loaded", loc.chunk())))?;
        chunk.blocks[loc.index_in_chunk()] = material.to_string();
        Ok(())
    }

    fn container(&self, owner: &str) -> Option<Vec<Option<ItemStack>>> {
        self.containers.read().ok()?.get(owner).cloned()
    }

    fn apply_container_diff(&self, owner: &str, changes: &[SlotChange]) -> Result<()> {
        let mut containers = self.containers.write().map_err(lock_err)?;
        let len = containers.get(owner).map_or(PLAYER_CONTAINER_SLOTS, Vec::len);

        // Containers never grow; the whole diff is refused on a bad index
        if let Some(bad) = changes.iter().find(|c| c.index as usize >= len) {
            return Err(SessionError::WorldError(format!(
                "slot {} is outside container {owner} of {len} slots",
                bad.index
            )));
        }

        let slots = containers
            .entry(owner.to_string())
            .or_insert_with(|| vec![None; PLAYER_CONTAINER_SLOTS]);
        for change in changes {
            slots[change.index as usize] = change.item.clone();
        }
        Ok(())
    }

    fn apply_settings(&self, time: f32, time_scale: f32, spawn: Vec2) {
        if let Ok(mut info) = self.info.write() {
            info.time = time;
            info.time_scale = time_scale;
            info.spawn = spawn;
        }
    }

    fn sync_body(&self, uuid: &str) -> Result<()> {
        affinity::require_actor(Actor::Physics)?;
        let position = self
            .get_entity(uuid)
            .map(|e| e.position)
            .ok_or_else(|| SessionError::WorldError(format!("No entity {uuid}")))?;
        self.bodies
            .write()
            .map_err(lock_err)?
            .insert(uuid.to_string(), position);
        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        debug!(world = %self.info().name, "World saved");
        Ok(())
    }
}
