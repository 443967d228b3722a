//! # World Synchronization Rules
//!
//! Pure decisions about how inbound world packets change local state, plus
//! the wire to domain conversions they need. Nothing here touches a
//! connection, which keeps the rules testable without actors.
//!
//! ## Movement
//! The receiver's own controlled entity is predicted locally. An
//! authoritative move only overrides the prediction when the two positions
//! are further apart than the correction threshold (squared distance).
//! Every other entity simply takes the authoritative state.

use crate::core::packet::{BlockData, ChunkData, EntitySnapshot, MoveEntity, SlotUpdate};
use crate::world::{BlockLoc, ChunkLoc, ChunkSnapshot, EntityState, ItemStack, SlotChange, Vec2};

/// What a move did to the local copy of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// Prediction close enough, left untouched
    Unchanged,
    /// Prediction overridden by the authoritative position
    Corrected { predicted: Vec2, authoritative: Vec2 },
    /// Non-controlled entity updated
    Applied,
}

/// Reconcile `update` against the local `entity` in place.
pub fn reconcile_move(
    entity: &mut EntityState,
    update: &MoveEntity,
    controlled: bool,
    threshold_sq: f32,
) -> MoveOutcome {
    let authoritative = update.position.map(Vec2::from).unwrap_or(entity.position);
    let velocity = update.velocity.map(Vec2::from).unwrap_or(entity.velocity);

    if controlled {
        let predicted = entity.position;
        if predicted.distance_sq(authoritative) <= threshold_sq {
            return MoveOutcome::Unchanged;
        }
        entity.position = authoritative;
        entity.velocity = velocity;
        return MoveOutcome::Corrected {
            predicted,
            authoritative,
        };
    }

    entity.position = authoritative;
    entity.velocity = velocity;
    if let (Some(current), Some(angle)) = (entity.look_angle_deg.as_mut(), update.look_angle_deg) {
        *current = angle;
    }
    MoveOutcome::Applied
}

pub fn block_loc(block: &BlockData) -> BlockLoc {
    BlockLoc::new(block.x, block.y)
}

pub fn entity_from_snapshot(snapshot: &EntitySnapshot) -> EntityState {
    let position = snapshot.position.map(Vec2::from).unwrap_or_default();
    let mut entity = EntityState::new(snapshot.uuid.clone(), snapshot.name.clone(), position);
    entity.velocity = snapshot.velocity.map(Vec2::from).unwrap_or_default();
    entity.look_angle_deg = snapshot.look_angle_deg;
    entity.holding = Some(snapshot.holding.clone()).filter(|h| !h.is_empty());
    entity
}

/// Full chunk snapshot from the wire. Missing trailing blocks stay empty.
pub fn chunk_from_data(data: &ChunkData) -> ChunkSnapshot {
    let mut chunk = ChunkSnapshot::empty(ChunkLoc::new(data.chunk_x, data.chunk_y));
    for (slot, material) in chunk.blocks.iter_mut().zip(&data.blocks) {
        slot.clone_from(material);
    }
    chunk
}

pub fn slot_changes(slots: &[SlotUpdate]) -> Vec<SlotChange> {
    slots
        .iter()
        .map(|slot| SlotChange {
            index: slot.index,
            item: slot
                .item
                .as_ref()
                .filter(|item| item.amount > 0 && !item.material.is_empty())
                .map(|item| ItemStack {
                    material: item.material.clone(),
                    amount: item.amount,
                }),
        })
        .collect()
}
