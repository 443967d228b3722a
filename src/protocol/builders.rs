//! Outbound packet builders.
//!
//! Every packet either side sends is constructed here from domain types, so
//! the authority rules for what may cross the wire live in one place.

use crate::core::packet::{
    self as wire, BlockData, BreakingBlockProgress, ChunkData, ChunkRequest, ClientWorldLoaded,
    ContainerRequest, ContainerUpdate, ContentKind, ContentRequest, DespawnEntity, DespawnReason,
    Disconnect, EntityRequest, EntitySnapshot, Heartbeat, HoldingItem, InitialChunksSent,
    InterfaceUpdate, LoginRequest, LoginStatus, LoginStatusKind, MoveEntity, Payload,
    SecretExchange, SecretResponse, SlotUpdate, SpawnEntity, StartGame, UpdateBlock, UpdateChunk,
    WorldBootstrap, WorldSettings,
};
use crate::error::{Result, SessionError};
use crate::world::{BlockLoc, ChunkLoc, ChunkSnapshot, EntityState, ItemStack, SlotChange, WorldInfo};

pub fn login_request(username: &str, protocol_version: u32) -> Payload {
    Payload::LoginRequest(LoginRequest {
        username: username.to_string(),
        protocol_version,
    })
}

pub fn secret_exchange(secret: &str, entity_uuid: &str) -> Payload {
    Payload::SecretExchange(SecretExchange {
        secret: secret.to_string(),
        entity_uuid: entity_uuid.to_string(),
    })
}

pub fn secret_response(secret: &str) -> Payload {
    Payload::SecretResponse(SecretResponse {
        secret: secret.to_string(),
    })
}

pub fn login_status(status: LoginStatusKind) -> Payload {
    Payload::LoginStatus(LoginStatus {
        status: status as i32,
    })
}

pub fn world_settings_message(info: &WorldInfo) -> WorldSettings {
    WorldSettings {
        time: info.time,
        time_scale: info.time_scale,
        spawn: Some(info.spawn.into()),
    }
}

pub fn world_settings(info: &WorldInfo) -> Payload {
    Payload::WorldSettings(world_settings_message(info))
}

/// `START_GAME` for the player's controlled entity.
pub fn start_game(info: &WorldInfo, controlling: &EntityState) -> Result<Payload> {
    Ok(Payload::StartGame(StartGame {
        world: Some(WorldBootstrap {
            name: info.name.clone(),
            seed: info.seed,
            settings: Some(world_settings_message(info)),
        }),
        controlling: Some(entity_snapshot(controlling)?),
    }))
}

pub fn client_world_loaded() -> Payload {
    Payload::ClientWorldLoaded(ClientWorldLoaded {})
}

pub fn initial_chunks_sent() -> Payload {
    Payload::InitialChunksSent(InitialChunksSent {})
}

pub fn heartbeat() -> Payload {
    Payload::Heartbeat(Heartbeat {})
}

pub fn disconnect(reason: &str) -> Payload {
    Payload::Disconnect(Disconnect {
        reason: reason.to_string(),
    })
}

/// Wire form of an entity. Authoritative-only entities never leave the server.
pub fn entity_snapshot(entity: &EntityState) -> Result<EntitySnapshot> {
    if entity.server_only {
        return Err(SessionError::AuthorityViolation(format!(
            "entity {} is authoritative-only",
            entity.uuid
        )));
    }
    Ok(EntitySnapshot {
        uuid: entity.uuid.clone(),
        name: entity.name.clone(),
        position: Some(entity.position.into()),
        velocity: Some(entity.velocity.into()),
        look_angle_deg: entity.look_angle_deg,
        holding: entity.holding.clone().unwrap_or_default(),
    })
}

pub fn spawn_entity(entity: &EntityState) -> Result<Payload> {
    Ok(Payload::SpawnEntity(SpawnEntity {
        entity: Some(entity_snapshot(entity)?),
    }))
}

pub fn despawn_entity(uuid: &str, reason: DespawnReason) -> Payload {
    Payload::DespawnEntity(DespawnEntity {
        uuid: uuid.to_string(),
        reason: reason as i32,
    })
}

pub fn move_entity(entity: &EntityState) -> Payload {
    Payload::MoveEntity(MoveEntity {
        uuid: entity.uuid.clone(),
        position: Some(entity.position.into()),
        velocity: Some(entity.velocity.into()),
        look_angle_deg: entity.look_angle_deg,
    })
}

pub fn holding_item(uuid: &str, material: &str) -> Payload {
    Payload::HoldingItem(HoldingItem {
        uuid: uuid.to_string(),
        material: material.to_string(),
    })
}

pub fn update_block(loc: BlockLoc, material: &str) -> Payload {
    Payload::UpdateBlock(UpdateBlock {
        block: Some(BlockData {
            x: loc.x,
            y: loc.y,
            material: material.to_string(),
        }),
    })
}

pub fn breaking_progress(loc: BlockLoc, progress: f32) -> Payload {
    Payload::BreakingBlockProgress(BreakingBlockProgress {
        block_x: loc.x,
        block_y: loc.y,
        progress,
    })
}

pub fn update_chunk(chunk: &ChunkSnapshot) -> Payload {
    Payload::UpdateChunk(UpdateChunk {
        chunk: Some(ChunkData {
            chunk_x: chunk.location.x,
            chunk_y: chunk.location.y,
            blocks: chunk.blocks.clone(),
        }),
    })
}

pub fn chunk_request(chunk: ChunkLoc) -> Payload {
    Payload::ChunkRequest(ChunkRequest {
        chunk_x: chunk.x,
        chunk_y: chunk.y,
    })
}

pub fn entity_request(uuid: &str) -> Payload {
    Payload::EntityRequest(EntityRequest {
        uuid: uuid.to_string(),
    })
}

pub fn container_request(owner: &str) -> Payload {
    Payload::ContainerRequest(ContainerRequest {
        owner: owner.to_string(),
    })
}

pub fn content_request(kind: ContentKind, owner: &str) -> Payload {
    Payload::ContentRequest(ContentRequest {
        kind: kind as i32,
        owner: owner.to_string(),
    })
}

pub fn interface_update(interface_id: &str, open: bool) -> Payload {
    Payload::InterfaceUpdate(InterfaceUpdate {
        interface_id: interface_id.to_string(),
        open,
    })
}

fn slot_update(change: &SlotChange) -> SlotUpdate {
    SlotUpdate {
        index: change.index,
        item: change.item.as_ref().map(|item| wire::ItemStack {
            material: item.material.clone(),
            amount: item.amount,
        }),
    }
}

pub fn container_update(owner: &str, changes: &[SlotChange]) -> Payload {
    Payload::ContainerUpdate(ContainerUpdate {
        owner: owner.to_string(),
        slots: changes.iter().map(slot_update).collect(),
    })
}

/// Every slot of a container, for answering a container request.
pub fn full_container(owner: &str, slots: &[Option<ItemStack>]) -> Payload {
    let changes: Vec<SlotChange> = slots
        .iter()
        .enumerate()
        .map(|(index, item)| SlotChange {
            index: index as u32,
            item: item.clone(),
        })
        .collect();
    container_update(owner, &changes)
}

/// Slots that differ between two container states, in index order.
///
/// Slots beyond the end of the shorter side count as empty.
pub fn container_diff(old: &[Option<ItemStack>], new: &[Option<ItemStack>]) -> Vec<SlotChange> {
    (0..old.len().max(new.len()))
        .filter_map(|index| {
            let before = old.get(index).cloned().flatten();
            let after = new.get(index).cloned().flatten();
            (before != after).then(|| SlotChange {
                index: index as u32,
                item: after,
            })
        })
        .collect()
}
