//! Client-side packet handling.
//!
//! Each function runs on the actor the dispatcher chose for its packet:
//! handshake steps inline on I/O, world instantiation and screen changes on
//! Main, movement on Ticker, chunk and block mutation on Async.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::packet::{
    DespawnEntity, DespawnReason, HoldingItem, MoveEntity, Payload, SecretExchange, StartGame,
};
use crate::error::{constants, Result, SessionError};
use crate::events::types::{
    BlockUpdated, ChunkReplaced, ContainerChanged, EntityCorrected, EntityDespawned,
    EntitySpawned, InterfaceUpdated, WorldReady, WorldSettingsChanged,
};
use crate::protocol::connection::ConnectionActor;
use crate::protocol::handshake::{self, LoginOutcome};
use crate::protocol::phase::HandshakePhase;
use crate::protocol::state::SharedConnectionState;
use crate::protocol::sync::{self, MoveOutcome};
use crate::protocol::builders;
use crate::runtime::affinity::Actor;
use crate::utils::metrics::global_metrics;
use crate::world::{BlockLoc, Screen, Vec2};

pub(super) fn handle(conn: &Arc<ConnectionActor>, payload: Payload) -> Result<()> {
    match payload {
        Payload::SecretExchange(exchange) => on_secret_exchange(conn, exchange),
        Payload::LoginStatus(status) => on_login_status(conn, status.status),
        Payload::StartGame(start) => on_start_game(conn, start),
        Payload::InitialChunksSent(_) => on_initial_chunks_sent(conn),
        Payload::UpdateChunk(update) => {
            let data = update
                .chunk
                .ok_or(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD))?;
            let chunk = sync::chunk_from_data(&data);
            let location = chunk.location;
            conn.require_world()?.replace_chunk(chunk)?;
            conn.bus.dispatch(ChunkReplaced { location });
            Ok(())
        }
        Payload::SpawnEntity(spawn) => {
            let snapshot = spawn
                .entity
                .ok_or(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD))?;
            let entity = sync::entity_from_snapshot(&snapshot);
            let uuid = entity.uuid.clone();
            conn.require_world()?.update_entity(entity)?;
            conn.bus.dispatch(EntitySpawned { uuid });
            Ok(())
        }
        Payload::MoveEntity(update) => on_move_entity(conn, update),
        Payload::HoldingItem(holding) => on_holding_item(conn, holding),
        Payload::UpdateBlock(update) => {
            let block = update
                .block
                .ok_or(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD))?;
            let loc = sync::block_loc(&block);
            let world = conn.require_world()?;
            if !world.is_chunk_loaded(loc.chunk()) {
                return request_chunk(conn, loc);
            }
            world.set_block(loc, &block.material)?;
            conn.bus.dispatch(BlockUpdated {
                location: loc,
                material: block.material,
            });
            Ok(())
        }
        Payload::DespawnEntity(despawn) => on_despawn_entity(conn, despawn),
        Payload::ContainerUpdate(update) => {
            let changes = sync::slot_changes(&update.slots);
            conn.require_world()?
                .apply_container_diff(&update.owner, &changes)?;
            conn.bus.dispatch(ContainerChanged {
                owner: update.owner,
                slots: changes.iter().map(|c| c.index).collect(),
            });
            Ok(())
        }
        Payload::BreakingBlockProgress(progress) => {
            let loc = BlockLoc::new(progress.block_x, progress.block_y);
            if let Ok(mut cache) = conn.breaking.lock() {
                cache.insert(loc, progress.progress);
            }
            Ok(())
        }
        Payload::WorldSettings(settings) => {
            let world = conn.require_world()?;
            let spawn = settings
                .spawn
                .map(Vec2::from)
                .unwrap_or_else(|| world.info().spawn);
            world.apply_settings(settings.time, settings.time_scale, spawn);
            conn.bus.dispatch(WorldSettingsChanged {
                time: settings.time,
                time_scale: settings.time_scale,
            });
            Ok(())
        }
        Payload::InterfaceUpdate(update) => {
            conn.bus.dispatch(InterfaceUpdated {
                interface_id: update.interface_id,
                open: update.open,
            });
            Ok(())
        }
        Payload::Heartbeat(_) => {
            if let Some(shared) = conn.shared.get() {
                shared.record_heartbeat();
                global_metrics().heartbeat_received();
            }
            Ok(())
        }
        Payload::Disconnect(disconnect) => {
            let reason = if disconnect.reason.is_empty() {
                constants::REASON_DISCONNECTED.to_string()
            } else {
                disconnect.reason
            };
            info!(peer = %conn.display_name, %reason, "Server closed the session");
            conn.teardown(&reason, false, false);
            Ok(())
        }
        other => Err(SessionError::UnexpectedPacket {
            packet: other.packet_type().name(),
            role: "client",
        }),
    }
}

fn on_secret_exchange(conn: &Arc<ConnectionActor>, exchange: SecretExchange) -> Result<()> {
    handshake::validate_secret_exchange(&exchange)?;
    let shared = conn.attach_shared(SharedConnectionState::new(
        exchange.entity_uuid,
        exchange.secret,
        &conn.config.sync,
    )?)?;

    conn.advance(HandshakePhase::AwaitingLoginStatus);
    conn.send(builders::secret_response(shared.secret()))
}

fn on_login_status(conn: &Arc<ConnectionActor>, status: i32) -> Result<()> {
    match handshake::interpret_login_status(status)? {
        LoginOutcome::Proceed => {
            debug!(peer = %conn.display_name, "Server is loading the player");
            Ok(())
        }
        LoginOutcome::Success => {
            let shared = conn.require_shared()?;
            conn.advance(HandshakePhase::AwaitingStartGame);
            conn.send(builders::entity_request(shared.entity_id()))
        }
    }
}

fn on_start_game(conn: &Arc<ConnectionActor>, start: StartGame) -> Result<()> {
    let shared = conn.require_shared()?;
    let (Some(bootstrap), Some(controlling)) = (start.world, start.controlling) else {
        return Err(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD));
    };

    let entity = sync::entity_from_snapshot(&controlling);
    if entity.uuid != shared.entity_id() {
        return Err(SessionError::HandshakeError(
            constants::ERR_UNEXPECTED_ENTITY_REQUEST.into(),
        ));
    }

    let factory = conn
        .world_factory
        .as_ref()
        .ok_or_else(|| SessionError::ConfigError(constants::ERR_NO_WORLD_FACTORY.into()))?;
    let world = factory(&bootstrap)
        .map_err(|e| SessionError::HandshakeError(format!("World instantiation failed: {e}")))?;
    world.update_entity(entity)?;
    conn.set_world(world)?;

    conn.started.set();
    conn.advance(HandshakePhase::AwaitingInitialChunks);
    conn.arm_heartbeat()?;
    conn.show_screen(Screen::Loading);
    info!(peer = %conn.display_name, world = %bootstrap.name, "World instantiated");
    conn.send(builders::client_world_loaded())
}

fn on_initial_chunks_sent(conn: &Arc<ConnectionActor>) -> Result<()> {
    let shared = conn.require_shared()?;
    if !conn.chunks_loaded.set() {
        return Ok(());
    }
    conn.advance(HandshakePhase::Playing);
    global_metrics().handshake_success();
    conn.show_screen(Screen::InGame);
    info!(peer = %conn.display_name, entity = %shared.entity_id(), "World ready");
    conn.bus.dispatch(WorldReady {
        entity_id: shared.entity_id().to_string(),
    });
    Ok(())
}

/// Ask the server for an entity we do not know, at most once per TTL.
fn request_entity(conn: &ConnectionActor, uuid: &str) -> Result<()> {
    let shared = conn.require_shared()?;
    if shared.mark_entity_requested(uuid) {
        debug!(peer = %conn.display_name, uuid, "Requesting unknown entity");
        global_metrics().resync_request();
        conn.send(builders::entity_request(uuid))?;
    }
    Ok(())
}

fn request_chunk(conn: &ConnectionActor, loc: BlockLoc) -> Result<()> {
    let shared = conn.require_shared()?;
    let chunk = loc.chunk();
    if shared.mark_chunk_requested(chunk) {
        debug!(peer = %conn.display_name, %chunk, "Block update for unloaded chunk, requesting it");
        global_metrics().resync_request();
        conn.send(builders::chunk_request(chunk))?;
    }
    Ok(())
}

fn on_move_entity(conn: &Arc<ConnectionActor>, update: MoveEntity) -> Result<()> {
    let shared = conn.require_shared()?;
    let world = conn.require_world()?;
    let Some(mut entity) = world.get_entity(&update.uuid) else {
        return request_entity(conn, &update.uuid);
    };

    let controlled = update.uuid == shared.entity_id();
    let threshold_sq = conn.config.sync.correction_threshold_sq;
    match sync::reconcile_move(&mut entity, &update, controlled, threshold_sq) {
        MoveOutcome::Unchanged => Ok(()),
        MoveOutcome::Applied => world.update_entity(entity),
        MoveOutcome::Corrected {
            predicted,
            authoritative,
        } => {
            world.update_entity(entity)?;
            global_metrics().correction();
            debug!(peer = %conn.display_name, ?predicted, ?authoritative, "Prediction corrected");

            let body_world = world.clone();
            let uuid = update.uuid.clone();
            conn.executor.post(
                Actor::Physics,
                Box::new(move || {
                    if let Err(e) = body_world.sync_body(&uuid) {
                        warn!(uuid, error = %e, "Physics body resync failed");
                    }
                }),
            )?;
            conn.bus.dispatch(EntityCorrected {
                uuid: update.uuid,
                predicted,
                authoritative,
            });
            Ok(())
        }
    }
}

fn on_holding_item(conn: &Arc<ConnectionActor>, holding: HoldingItem) -> Result<()> {
    let world = conn.require_world()?;
    let Some(mut entity) = world.get_entity(&holding.uuid) else {
        return request_entity(conn, &holding.uuid);
    };
    entity.holding = Some(holding.material).filter(|m| !m.is_empty());
    world.update_entity(entity)
}

fn on_despawn_entity(conn: &Arc<ConnectionActor>, despawn: DespawnEntity) -> Result<()> {
    let reason = DespawnReason::try_from(despawn.reason).unwrap_or(DespawnReason::UnspecifiedReason);
    let removed = conn.require_world()?.remove_entity(&despawn.uuid).is_some();

    if reason.is_benign() {
        debug!(peer = %conn.display_name, uuid = %despawn.uuid, ?reason, removed, "Entity despawned");
    } else {
        warn!(peer = %conn.display_name, uuid = %despawn.uuid, ?reason, removed, "Entity despawned");
    }

    conn.bus.dispatch(EntityDespawned {
        uuid: despawn.uuid,
        reason,
    });
    Ok(())
}
