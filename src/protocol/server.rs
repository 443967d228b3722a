//! Server-side packet handling and the registry of live sessions.
//!
//! ## Login
//! ```text
//! LOGIN_REQUEST ─► SECRET_EXCHANGE ─► SECRET_RESPONSE ─► LOGIN_STATUS(proceed)
//!       ─► (Async: load player) ─► LOGIN_STATUS(success) ─► ENTITY_REQUEST
//!       ─► START_GAME ─► CLIENT_WORLD_LOADED ─► chunks + spawns ─► INITIAL_CHUNKS_SENT
//! ```
//!
//! The server is authoritative. Client moves are only accepted for the
//! sender's own entity, and authoritative-only entities are filtered out
//! before anything is serialized.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::packet::{
    ContentKind, DespawnReason, EntityRequest, HoldingItem, LoginRequest, LoginStatusKind,
    MoveEntity, Payload,
};
use crate::error::{constants, Result, SessionError};
use crate::events::types::{BlockUpdated, ContainerChanged, PlayerJoined, PlayerLeft};
use crate::protocol::builders;
use crate::protocol::connection::ConnectionActor;
use crate::protocol::handshake::{self, LoginContext};
use crate::protocol::phase::HandshakePhase;
use crate::protocol::state::SharedConnectionState;
use crate::protocol::sync;
use crate::runtime::affinity::Actor;
use crate::utils::metrics::{global_metrics, Timer};
use crate::world::{BlockLoc, ChunkLoc, Vec2};

/// Live sessions of one server, keyed by username.
///
/// Holds sessions weakly; a dropped or closed connection no longer counts
/// towards the player limit.
#[derive(Debug)]
pub struct SessionRegistry {
    max_players: usize,
    sessions: RwLock<HashMap<String, Weak<ConnectionActor>>>,
}

impl SessionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            max_players,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err<T>(_: T) -> SessionError {
        SessionError::Custom(constants::ERR_REGISTRY_LOCK.into())
    }

    /// Reserve `username` for `conn`, or say why the login is refused.
    pub fn claim(&self, username: &str, conn: &Arc<ConnectionActor>) -> Result<LoginStatusKind> {
        let mut sessions = self.sessions.write().map_err(Self::lock_err)?;
        sessions.retain(|_, session| is_live(session));

        let status = handshake::evaluate_login_status(LoginContext {
            already_logged_in: sessions.contains_key(username),
            server_full: sessions.len() >= self.max_players,
        });
        if status == LoginStatusKind::ProceedLogin {
            sessions.insert(username.to_string(), Arc::downgrade(conn));
        }
        Ok(status)
    }

    /// Forget `username` if it is still held by `conn`.
    pub fn release(&self, username: &str, conn: &ConnectionActor) -> bool {
        let Ok(mut sessions) = self.sessions.write() else {
            return false;
        };
        let owned = sessions
            .get(username)
            .is_some_and(|session| std::ptr::eq(session.as_ptr(), conn));
        if owned {
            sessions.remove(username);
        }
        owned
    }

    pub fn is_logged_in(&self, username: &str) -> bool {
        self.sessions
            .read()
            .map(|sessions| sessions.get(username).is_some_and(is_live))
            .unwrap_or(false)
    }

    pub fn sessions(&self) -> Vec<Arc<ConnectionActor>> {
        self.sessions
            .read()
            .map(|sessions| {
                sessions
                    .values()
                    .filter_map(Weak::upgrade)
                    .filter(|conn| !conn.is_closed())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `payload` to every playing session. Returns how many got it.
    pub fn broadcast(&self, payload: &Payload) -> usize {
        self.send_to_playing(payload, None)
    }

    /// Like [`broadcast`](Self::broadcast), skipping `except`.
    pub fn broadcast_except(&self, except: &ConnectionActor, payload: &Payload) -> usize {
        self.send_to_playing(payload, Some(except))
    }

    fn send_to_playing(&self, payload: &Payload, except: Option<&ConnectionActor>) -> usize {
        self.sessions()
            .iter()
            .filter(|conn| except.map_or(true, |skip| !std::ptr::eq(Arc::as_ptr(conn), skip)))
            .filter(|conn| conn.phase() == HandshakePhase::Playing)
            .filter(|conn| conn.send(payload.clone()).is_ok())
            .count()
    }

    /// Close every session with `reason`.
    pub fn dispose_all(&self, reason: &str) -> usize {
        self.sessions()
            .iter()
            .filter(|conn| conn.teardown(reason, true, false))
            .count()
    }
}

fn is_live(session: &Weak<ConnectionActor>) -> bool {
    session.upgrade().is_some_and(|conn| !conn.is_closed())
}

pub(super) fn handle(conn: &Arc<ConnectionActor>, payload: Payload) -> Result<()> {
    match payload {
        Payload::LoginRequest(request) => on_login_request(conn, request),
        Payload::SecretResponse(response) => on_secret_response(conn, &response.secret),
        Payload::EntityRequest(request) => on_entity_request(conn, request),
        Payload::ClientWorldLoaded(_) => stream_initial_world(conn),
        Payload::MoveEntity(update) => on_move_entity(conn, update),
        Payload::HoldingItem(holding) => on_holding_item(conn, holding),
        Payload::UpdateBlock(update) => {
            let block = update
                .block
                .ok_or(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD))?;
            let loc = sync::block_loc(&block);
            let world = conn.require_world()?;
            if !world.is_chunk_loaded(loc.chunk()) {
                warn!(peer = %conn.display_name, %loc, "Block update outside loaded chunks");
                return Ok(());
            }
            world.set_block(loc, &block.material)?;
            if let Some(registry) = &conn.registry {
                registry.broadcast_except(conn, &builders::update_block(loc, &block.material));
            }
            conn.bus.dispatch(BlockUpdated {
                location: loc,
                material: block.material,
            });
            Ok(())
        }
        Payload::BreakingBlockProgress(progress) => {
            let loc = BlockLoc::new(progress.block_x, progress.block_y);
            if let Ok(mut cache) = conn.breaking.lock() {
                cache.insert(loc, progress.progress);
            }
            if let Some(registry) = &conn.registry {
                registry.broadcast_except(conn, &builders::breaking_progress(loc, progress.progress));
            }
            Ok(())
        }
        Payload::ChunkRequest(request) => {
            let loc = ChunkLoc::new(request.chunk_x, request.chunk_y);
            match conn.require_world()?.get_chunk(loc) {
                Some(chunk) => conn.send(builders::update_chunk(&chunk)),
                None => {
                    debug!(peer = %conn.display_name, chunk = %loc, "Requested chunk is not loaded");
                    Ok(())
                }
            }
        }
        Payload::ContainerUpdate(update) => {
            let shared = conn.require_shared()?;
            if update.owner != shared.entity_id() {
                return Err(SessionError::AuthorityViolation(format!(
                    "container {} is not owned by the sender",
                    update.owner
                )));
            }
            let changes = sync::slot_changes(&update.slots);
            conn.require_world()?
                .apply_container_diff(&update.owner, &changes)?;
            conn.bus.dispatch(ContainerChanged {
                owner: update.owner,
                slots: changes.iter().map(|c| c.index).collect(),
            });
            Ok(())
        }
        Payload::ContainerRequest(request) => send_container(conn, &request.owner),
        Payload::ContentRequest(request) => {
            match ContentKind::try_from(request.kind).unwrap_or(ContentKind::UnspecifiedContent) {
                ContentKind::WorldSettingsContent => {
                    let info = conn.require_world()?.info();
                    conn.send(builders::world_settings(&info))
                }
                ContentKind::ContainerContent => send_container(conn, &request.owner),
                ContentKind::UnspecifiedContent => {
                    warn!(peer = %conn.display_name, kind = request.kind, "Unknown content request");
                    Ok(())
                }
            }
        }
        Payload::Heartbeat(_) => {
            conn.require_shared()?.record_heartbeat();
            global_metrics().heartbeat_received();
            Ok(())
        }
        Payload::Disconnect(disconnect) => {
            let reason = if disconnect.reason.is_empty() {
                constants::REASON_DISCONNECTED.to_string()
            } else {
                disconnect.reason
            };
            info!(peer = %conn.display_name, %reason, "Client closed the session");
            conn.teardown(&reason, false, false);
            Ok(())
        }
        other => Err(SessionError::UnexpectedPacket {
            packet: other.packet_type().name(),
            role: "server",
        }),
    }
}

#[instrument(skip(conn, request), fields(peer = %conn.display_name, username = %request.username))]
fn on_login_request(conn: &Arc<ConnectionActor>, request: LoginRequest) -> Result<()> {
    global_metrics().handshake_attempt();
    handshake::validate_login_request(&request, conn.config.transport.protocol_version)?;

    let world = conn.require_world()?;
    let entity_id = world
        .player_entity(&request.username)
        .map(|entity| entity.uuid)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let _ = conn.username.set(request.username);
    let shared = conn.attach_shared(SharedConnectionState::new(
        entity_id,
        handshake::generate_secret(),
        &conn.config.sync,
    )?)?;

    conn.advance(HandshakePhase::AwaitingSecretResponse);
    conn.send(builders::secret_exchange(shared.secret(), shared.entity_id()))
}

fn on_secret_response(conn: &Arc<ConnectionActor>, secret: &str) -> Result<()> {
    conn.require_shared()?.verify_secret(secret)?;
    conn.advance(HandshakePhase::AwaitingLoginStatus);

    let username = conn
        .username()
        .ok_or_else(|| SessionError::HandshakeError(constants::ERR_EMPTY_USERNAME.into()))?
        .to_string();
    let registry = conn
        .registry
        .as_ref()
        .ok_or_else(|| SessionError::ConfigError("Server connection has no registry".into()))?;

    let status = registry.claim(&username, conn)?;
    if status != LoginStatusKind::ProceedLogin {
        conn.send(builders::login_status(status))?;
        return Err(SessionError::LoginRejected(status.name()));
    }

    conn.send(builders::login_status(LoginStatusKind::ProceedLogin))?;
    conn.defer(Actor::Async, move |conn| load_player(conn, &username))
}

/// Async: load or create the player's entity, then confirm the login.
fn load_player(conn: &Arc<ConnectionActor>, username: &str) -> Result<()> {
    let _timer = Timer::start("load_player");
    let shared = conn.require_shared()?;
    let entity = conn
        .require_world()?
        .load_entity(shared.entity_id(), username)
        .map_err(|e| SessionError::HandshakeError(format!("Player load failed: {e}")))?;

    conn.started.set();
    conn.send(builders::login_status(LoginStatusKind::LoginSuccess))?;
    info!(peer = %conn.display_name, username, entity = %entity.uuid, "Player loaded");
    conn.bus.dispatch(PlayerJoined {
        username: username.to_string(),
        entity_id: entity.uuid,
    });
    Ok(())
}

fn on_entity_request(conn: &Arc<ConnectionActor>, request: EntityRequest) -> Result<()> {
    let shared = conn.require_shared()?;
    let world = conn.require_world()?;

    if conn.phase() == HandshakePhase::AwaitingLoginStatus {
        // The first request names the player's own entity and starts the game
        if request.uuid != shared.entity_id() || !conn.started.is_set() {
            return Err(SessionError::HandshakeError(
                constants::ERR_UNEXPECTED_ENTITY_REQUEST.into(),
            ));
        }
        let entity = world.get_entity(&request.uuid).ok_or_else(|| {
            SessionError::HandshakeError(constants::ERR_UNEXPECTED_ENTITY_REQUEST.into())
        })?;
        let start = builders::start_game(&world.info(), &entity)?;
        conn.advance(HandshakePhase::AwaitingStartGame);
        return conn.send(start);
    }

    match world.get_entity(&request.uuid).filter(|e| !e.server_only) {
        Some(entity) => conn.send(builders::spawn_entity(&entity)?),
        None => conn.send(builders::despawn_entity(
            &request.uuid,
            DespawnReason::UnknownEntity,
        )),
    }
}

/// Async: stream the player's surroundings and enter Playing.
fn stream_initial_world(conn: &Arc<ConnectionActor>) -> Result<()> {
    let _timer = Timer::start("stream_initial_world");
    let shared = conn.require_shared()?;
    let world = conn.require_world()?;
    conn.advance(HandshakePhase::AwaitingInitialChunks);

    let player = world
        .get_entity(shared.entity_id())
        .ok_or_else(|| SessionError::HandshakeError(constants::ERR_NO_SESSION.into()))?;

    let center = player.position.block().chunk();
    let mut streamed = 0usize;
    for loc in center.around(conn.config.server.view_radius) {
        if let Some(chunk) = world.get_chunk(loc) {
            conn.send(builders::update_chunk(&chunk))?;
            streamed += 1;
        }
    }
    for entity in world.entities() {
        if entity.server_only || entity.uuid == player.uuid {
            continue;
        }
        conn.send(builders::spawn_entity(&entity)?)?;
    }

    conn.chunks_loaded.set();
    conn.send(builders::initial_chunks_sent())?;
    conn.advance(HandshakePhase::Playing);
    conn.arm_heartbeat()?;
    global_metrics().handshake_success();
    info!(peer = %conn.display_name, chunks = streamed, "Player entered the world");

    if let Some(registry) = &conn.registry {
        registry.broadcast_except(conn, &builders::spawn_entity(&player)?);
    }
    Ok(())
}

fn on_move_entity(conn: &Arc<ConnectionActor>, update: MoveEntity) -> Result<()> {
    let shared = conn.require_shared()?;
    if update.uuid != shared.entity_id() {
        warn!(peer = %conn.display_name, uuid = %update.uuid, "Ignoring move for an entity the client does not control");
        return Ok(());
    }

    let world = conn.require_world()?;
    let Some(mut entity) = world.get_entity(&update.uuid) else {
        return Ok(());
    };
    entity.position = update.position.map(Vec2::from).unwrap_or(entity.position);
    entity.velocity = update.velocity.map(Vec2::from).unwrap_or(entity.velocity);
    if update.look_angle_deg.is_some() {
        entity.look_angle_deg = update.look_angle_deg;
    }

    let echo = builders::move_entity(&entity);
    world.update_entity(entity)?;
    if let Some(registry) = &conn.registry {
        registry.broadcast_except(conn, &echo);
    }
    Ok(())
}

fn on_holding_item(conn: &Arc<ConnectionActor>, holding: HoldingItem) -> Result<()> {
    let shared = conn.require_shared()?;
    if holding.uuid != shared.entity_id() {
        warn!(peer = %conn.display_name, uuid = %holding.uuid, "Ignoring held item for an entity the client does not control");
        return Ok(());
    }

    let world = conn.require_world()?;
    let Some(mut entity) = world.get_entity(&holding.uuid) else {
        return Ok(());
    };
    entity.holding = Some(holding.material.clone()).filter(|m| !m.is_empty());
    world.update_entity(entity)?;
    if let Some(registry) = &conn.registry {
        registry.broadcast_except(conn, &builders::holding_item(&holding.uuid, &holding.material));
    }
    Ok(())
}

fn send_container(conn: &ConnectionActor, owner: &str) -> Result<()> {
    match conn.require_world()?.container(owner) {
        Some(slots) => conn.send(builders::full_container(owner, &slots)),
        None => {
            debug!(peer = %conn.display_name, owner, "Requested container does not exist");
            Ok(())
        }
    }
}

/// Release everything a closed session held on the server.
pub(super) fn on_session_end(conn: &ConnectionActor) {
    let Some(registry) = conn.registry.clone() else {
        return;
    };
    let Some(username) = conn.username().map(str::to_string) else {
        return;
    };
    registry.release(&username, conn);

    let (Some(world), Some(shared)) = (conn.world(), conn.shared()) else {
        return;
    };
    if !conn.started.is_set() {
        return;
    }

    let entity_id = shared.entity_id().to_string();
    let job_user = username.clone();
    let posted = conn.executor.post(
        Actor::Async,
        Box::new(move || {
            let _timer = Timer::start("world_save");
            if let Err(e) = world.save() {
                warn!(username = %job_user, error = %e, "World save failed");
            }
            world.remove_entity(&entity_id);
            registry.broadcast(&builders::despawn_entity(&entity_id, DespawnReason::PlayerQuit));
        }),
    );
    if let Err(e) = posted {
        warn!(peer = %conn.display_name, error = %e, "Session cleanup not scheduled");
    }

    conn.bus.dispatch(PlayerLeft { username });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::protocol::connection::ConnectionBuilder;
    use crate::runtime::executor::ManualExecutor;
    use crate::world::memory::MemoryWorld;

    fn server(registry: &Arc<SessionRegistry>) -> Arc<ConnectionActor> {
        let world = Arc::new(MemoryWorld::flat("test", 1, 1));
        let (conn, _rx) = ConnectionBuilder::server(Arc::new(SessionConfig::default()))
            .executor(Arc::new(ManualExecutor::new()))
            .world(world)
            .registry(registry.clone())
            .build()
            .unwrap();
        conn
    }

    #[test]
    fn test_registry_rejects_duplicate_username() {
        let registry = Arc::new(SessionRegistry::new(4));
        let first = server(&registry);
        let second = server(&registry);

        assert_eq!(registry.claim("alice", &first).unwrap(), LoginStatusKind::ProceedLogin);
        assert_eq!(registry.claim("alice", &second).unwrap(), LoginStatusKind::AlreadyLoggedIn);
        assert!(registry.is_logged_in("alice"));
    }

    #[test]
    fn test_registry_full() {
        let registry = Arc::new(SessionRegistry::new(1));
        let first = server(&registry);
        let second = server(&registry);

        assert_eq!(registry.claim("alice", &first).unwrap(), LoginStatusKind::ProceedLogin);
        assert_eq!(registry.claim("bob", &second).unwrap(), LoginStatusKind::FullServer);
    }

    #[test]
    fn test_closed_session_frees_its_slot() {
        let registry = Arc::new(SessionRegistry::new(1));
        let first = server(&registry);
        registry.claim("alice", &first).unwrap();

        first.dispose();
        let second = server(&registry);
        assert_eq!(registry.claim("bob", &second).unwrap(), LoginStatusKind::ProceedLogin);
        assert!(!registry.is_logged_in("alice"));
    }

    #[test]
    fn test_release_ignores_other_owner() {
        let registry = Arc::new(SessionRegistry::new(4));
        let first = server(&registry);
        let second = server(&registry);
        registry.claim("alice", &first).unwrap();

        assert!(!registry.release("alice", &second));
        assert!(registry.release("alice", &first));
    }
}
