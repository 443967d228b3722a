// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::SessionConfig;
use crate::core::packet::{Direction, LoginStatusKind, Packet, PacketType, Payload};
use crate::error::{constants, SessionError};
use crate::events::types::{Disconnected, EntityCorrected, LoginProgress, WorldReady};
use crate::events::{Event, EventBus};
use crate::protocol::builders;
use crate::protocol::connection::{ConnectionActor, ConnectionBuilder};
use crate::protocol::dispatcher::Handled;
use crate::protocol::phase::HandshakePhase;
use crate::protocol::server::SessionRegistry;
use crate::runtime::affinity::Actor;
use crate::runtime::executor::{Executor, Job, ManualExecutor};
use crate::world::memory::MemoryWorld;
use crate::world::{BlockLoc, ChunkLoc, EntityState, Screen, ScreenSlot, SharedScreen, Vec2, WorldStore};

/// A client and a server wired back to back through their outbound queues,
/// with every actor job run on one deterministic executor.
struct Pair {
    executor: Arc<ManualExecutor>,
    bus: EventBus,
    world: Arc<MemoryWorld>,
    replica: Arc<OnceLock<Arc<MemoryWorld>>>,
    registry: Arc<SessionRegistry>,
    screen: Arc<SharedScreen>,
    client: Arc<ConnectionActor>,
    client_rx: UnboundedReceiver<Packet>,
    server: Arc<ConnectionActor>,
    server_rx: UnboundedReceiver<Packet>,
}

impl Pair {
    fn new() -> Self {
        let world = Arc::new(MemoryWorld::flat("overworld", 42, 3));
        let registry = Arc::new(SessionRegistry::new(8));
        Self::sharing(world, registry, EventBus::new(64))
    }

    fn sharing(world: Arc<MemoryWorld>, registry: Arc<SessionRegistry>, bus: EventBus) -> Self {
        let config = Arc::new(SessionConfig::default());
        let executor = Arc::new(ManualExecutor::new());
        let screen = Arc::new(SharedScreen::new());
        let replica: Arc<OnceLock<Arc<MemoryWorld>>> = Arc::new(OnceLock::new());

        let slot = replica.clone();
        let (client, client_rx) = ConnectionBuilder::client(config.clone())
            .display_name("client")
            .executor(executor.clone())
            .bus(bus.clone())
            .screen(screen.clone())
            .world_factory(Arc::new(move |bootstrap| {
                let world = Arc::new(MemoryWorld::from_bootstrap(bootstrap));
                let _ = slot.set(world.clone());
                let world: Arc<dyn WorldStore> = world;
                Ok(world)
            }))
            .build()
            .unwrap();

        let (server, server_rx) = ConnectionBuilder::server(config)
            .display_name("server")
            .executor(executor.clone())
            .bus(bus.clone())
            .world(world.clone())
            .registry(registry.clone())
            .build()
            .unwrap();

        Self {
            executor,
            bus,
            world,
            replica,
            registry,
            screen,
            client,
            client_rx,
            server,
            server_rx,
        }
    }

    /// Deliver queued packets and run queued jobs until both sides are idle.
    fn pump(&mut self) {
        loop {
            let mut moved = 0;
            while let Ok(packet) = self.client_rx.try_recv() {
                let _ = self.server.receive(packet);
                moved += 1;
            }
            while let Ok(packet) = self.server_rx.try_recv() {
                let _ = self.client.receive(packet);
                moved += 1;
            }
            moved += self.executor.run_pending();
            if moved == 0 {
                break;
            }
        }
    }

    fn login(&mut self, username: &str) {
        self.client.begin_login(username).unwrap();
        self.pump();
    }

    fn replica(&self) -> Arc<MemoryWorld> {
        self.replica.get().cloned().expect("client world instantiated")
    }

    fn entity_id(&self) -> String {
        self.client.shared().unwrap().entity_id().to_string()
    }

    /// Take what the client queued for the server without delivering it.
    fn client_outbound(&mut self) -> Vec<Packet> {
        std::iter::from_fn(|| self.client_rx.try_recv().ok()).collect()
    }

    fn to_client(&self, payload: Payload) -> Result<Handled, SessionError> {
        self.client.receive(Packet::new(Direction::Client, payload))
    }
}

fn record<E: Event + Clone>(bus: &EventBus) -> (Arc<impl Fn(&E) + Send + Sync>, Arc<Mutex<Vec<E>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = Arc::new(move |event: &E| sink.lock().unwrap().push(event.clone()));
    bus.register::<E, _>(&listener);
    (listener, seen)
}

fn kinds(packets: &[Packet]) -> Vec<PacketType> {
    packets.iter().map(|p| p.kind().unwrap()).collect()
}

#[tokio::test]
async fn test_full_handshake_reaches_playing() {
    let mut pair = Pair::new();
    let (_progress, phases) = record::<LoginProgress>(&pair.bus);
    let (_ready, ready) = record::<WorldReady>(&pair.bus);

    pair.login("alice");

    assert_eq!(pair.client.phase(), HandshakePhase::Playing);
    assert_eq!(pair.server.phase(), HandshakePhase::Playing);
    assert!(pair.client.is_started() && pair.client.is_chunks_loaded());
    assert!(pair.server.is_started() && pair.server.is_chunks_loaded());
    assert!(pair.registry.is_logged_in("alice"));
    assert_eq!(pair.screen.current(), Screen::InGame);

    // Both sides agree on the secret and the controlled entity
    let client_state = pair.client.shared().unwrap();
    let server_state = pair.server.shared().unwrap();
    assert_eq!(client_state.secret(), server_state.secret());
    assert_eq!(client_state.entity_id(), server_state.entity_id());
    assert!(client_state.has_heartbeat_task());
    assert!(server_state.has_heartbeat_task());

    let replica = pair.replica();
    assert!(replica.get_entity(&pair.entity_id()).is_some());
    assert!(replica.is_chunk_loaded(ChunkLoc::new(0, 0)));
    assert!(replica.is_chunk_loaded(ChunkLoc::new(-2, 2)));
    assert_eq!(replica.loaded_chunks(), 25);

    assert_eq!(ready.lock().unwrap().len(), 1);
    let client_phases: Vec<HandshakePhase> = phases
        .lock()
        .unwrap()
        .iter()
        .filter(|p| p.peer == "client")
        .map(|p| p.phase)
        .collect();
    assert_eq!(
        client_phases,
        vec![
            HandshakePhase::AwaitingLoginStatus,
            HandshakePhase::AwaitingStartGame,
            HandshakePhase::AwaitingInitialChunks,
            HandshakePhase::Playing,
        ]
    );
}

#[tokio::test]
async fn test_server_never_streams_authoritative_only_entities() {
    let mut pair = Pair::new();
    let mut guard = EntityState::new("npc-guard", "guard", Vec2::new(3.0, 0.0));
    guard.server_only = true;
    pair.world.update_entity(guard).unwrap();
    pair.world
        .update_entity(EntityState::new("npc-pig", "pig", Vec2::new(4.0, 0.0)))
        .unwrap();

    pair.login("alice");

    let replica = pair.replica();
    assert!(replica.get_entity("npc-pig").is_some());
    assert!(replica.get_entity("npc-guard").is_none());
}

#[tokio::test]
async fn test_gameplay_before_playing_is_dropped() {
    let pair = Pair::new();
    let mover = EntityState::new("someone", "x", Vec2::ZERO);

    let handled = pair.to_client(builders::move_entity(&mover)).unwrap();
    assert_eq!(handled, Handled::Dropped);
    let handled = pair
        .to_client(builders::update_block(BlockLoc::new(0, 0), "stone"))
        .unwrap();
    assert_eq!(handled, Handled::Dropped);

    assert_eq!(pair.client.phase(), HandshakePhase::Connecting);
    assert!(!pair.client.is_closed());
    assert_eq!(pair.executor.pending(), 0);
}

#[tokio::test]
async fn test_server_drops_gameplay_before_secret() {
    let mut pair = Pair::new();
    let mover = EntityState::new("someone", "x", Vec2::ZERO);

    for payload in [
        builders::move_entity(&mover),
        builders::holding_item("someone", "torch"),
        builders::update_block(BlockLoc::new(0, 0), "stone"),
        builders::chunk_request(ChunkLoc::new(0, 0)),
    ] {
        let handled = pair.server.receive(Packet::new(Direction::Server, payload)).unwrap();
        assert_eq!(handled, Handled::Dropped);
    }

    assert_eq!(pair.server.phase(), HandshakePhase::Connecting);
    assert!(!pair.server.is_closed());
    assert!(pair.server_rx.try_recv().is_err());
    assert_eq!(pair.executor.pending(), 0);
    assert_eq!(pair.world.get_chunk(ChunkLoc::new(0, 0)).unwrap().block(BlockLoc::new(0, 0)), Some(""));

    // The handshake still proceeds afterwards
    pair.login("alice");
    assert_eq!(pair.server.phase(), HandshakePhase::Playing);
}

#[tokio::test]
async fn test_out_of_sequence_handshake_is_fatal() {
    let mut pair = Pair::new();
    let (_listener, closed) = record::<Disconnected>(&pair.bus);

    let result = pair
        .server
        .receive(Packet::new(Direction::Server, builders::secret_response("guess")));
    assert!(matches!(result, Err(SessionError::OutOfSequence { .. })));
    assert!(pair.server.is_closed());
    assert_eq!(pair.server.phase(), HandshakePhase::Closed);

    // The peer is told why
    let notice = pair.server_rx.try_recv().unwrap();
    assert_eq!(notice.kind().unwrap(), PacketType::Disconnect);

    let closed = closed.lock().unwrap();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].fatal);
}

/// Executor whose actors never take work.
struct RefusingExecutor;

impl Executor for RefusingExecutor {
    fn post(&self, actor: Actor, _job: Job) -> crate::error::Result<()> {
        Err(SessionError::ActorUnavailable(actor))
    }
}

#[tokio::test]
async fn test_unpostable_deferred_packet_closes_client() {
    let (client, _rx) = ConnectionBuilder::client(Arc::new(SessionConfig::default()))
        .executor(Arc::new(RefusingExecutor))
        .bus(EventBus::new(0))
        .world_factory(MemoryWorld::factory())
        .build()
        .unwrap();
    let to_client = |payload| client.receive(Packet::new(Direction::Client, payload));

    to_client(builders::secret_exchange("s1", "e1")).unwrap();
    to_client(builders::login_status(LoginStatusKind::LoginSuccess)).unwrap();
    assert_eq!(client.phase(), HandshakePhase::AwaitingStartGame);

    let info = MemoryWorld::flat("overworld", 1, 0).info();
    let entity = EntityState::new("e1", "alice", Vec2::ZERO);
    let result = to_client(builders::start_game(&info, &entity).unwrap());

    assert!(matches!(result, Err(SessionError::ActorUnavailable(Actor::Main))));
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_unpostable_login_work_closes_server() {
    let config = Arc::new(SessionConfig::default());
    let version = config.transport.protocol_version;
    let (server, _rx) = ConnectionBuilder::server(config)
        .executor(Arc::new(RefusingExecutor))
        .bus(EventBus::new(0))
        .world(Arc::new(MemoryWorld::flat("overworld", 1, 0)))
        .registry(Arc::new(SessionRegistry::new(8)))
        .build()
        .unwrap();

    server
        .receive(Packet::new(Direction::Server, builders::login_request("alice", version)))
        .unwrap();
    let secret = server.shared().unwrap().secret().to_string();
    let result = server.receive(Packet::new(Direction::Server, builders::secret_response(&secret)));

    assert!(matches!(result, Err(SessionError::ActorUnavailable(Actor::Async))));
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_wrong_direction_is_fatal() {
    let pair = Pair::new();
    let result = pair
        .client
        .receive(Packet::new(Direction::Server, builders::heartbeat()));
    assert!(matches!(result, Err(SessionError::DirectionMismatch { .. })));
    assert!(pair.client.is_closed());
}

#[tokio::test]
async fn test_secret_mismatch_after_login_is_fatal() {
    let mut pair = Pair::new();
    pair.login("alice");

    let forged = Packet::new(Direction::Server, builders::heartbeat()).with_secret("not-the-secret");
    let result = pair.server.receive(forged);

    assert!(matches!(result, Err(SessionError::SecretMismatch)));
    assert!(pair.server.is_closed());
    assert!(!pair.server.shared().unwrap().has_heartbeat_task());
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let mut pair = Pair::new();
    let (_listener, closed) = record::<Disconnected>(&pair.bus);
    pair.login("alice");
    let state = pair.client.shared().unwrap();

    assert!(pair.client.dispose());
    assert!(!pair.client.dispose());
    assert!(!pair.client.fatal(&SessionError::StoppedResponding));

    assert_eq!(state.heartbeat_cancellations(), 1);
    assert!(!state.has_heartbeat_task());
    assert!(matches!(
        pair.client.send(builders::heartbeat()),
        Err(SessionError::ConnectionClosed)
    ));

    // The server hears the disconnect and releases the player
    pair.pump();
    assert!(pair.server.is_closed());
    assert!(!pair.registry.is_logged_in("alice"));
    assert!(pair.world.get_entity(&pair.entity_id()).is_none());
    assert!(pair.world.saves() >= 1);

    let closed = closed.lock().unwrap();
    let client_closes = closed.iter().filter(|d| d.peer == "client").count();
    assert_eq!(client_closes, 1);
    assert!(closed.iter().all(|d| !d.fatal));
}

#[tokio::test]
async fn test_unknown_entity_requested_once() {
    let mut pair = Pair::new();
    pair.login("alice");

    let ghost = EntityState::new("ghost", "ghost", Vec2::new(1.0, 1.0));
    for _ in 0..5 {
        let handled = pair.to_client(builders::move_entity(&ghost)).unwrap();
        assert_eq!(handled, Handled::Deferred(Actor::Ticker));
    }
    pair.executor.run_pending();

    let requests: Vec<Packet> = pair
        .client_outbound()
        .into_iter()
        .filter(|p| matches!(&p.payload, Some(Payload::EntityRequest(r)) if r.uuid == "ghost"))
        .collect();
    assert_eq!(requests.len(), 1);
    assert!(pair.replica().get_entity("ghost").is_none());
}

#[tokio::test]
async fn test_server_answers_unknown_entity_with_despawn() {
    let mut pair = Pair::new();
    pair.login("alice");
    pair.client.send(builders::entity_request("nobody")).unwrap();

    let request = pair.client_rx.try_recv().unwrap();
    pair.server.receive(request).unwrap();
    pair.executor.run_pending();

    let reply = pair.server_rx.try_recv().unwrap();
    assert_eq!(reply.kind().unwrap(), PacketType::DespawnEntity);
}

#[tokio::test]
async fn test_block_update_for_unloaded_chunk_requests_it() {
    let mut pair = Pair::new();
    pair.login("alice");

    let far = BlockLoc::new(1000, 1000);
    pair.to_client(builders::update_block(far, "gold")).unwrap();
    pair.to_client(builders::update_block(far, "gold")).unwrap();
    pair.executor.run_pending();

    let sent = pair.client_outbound();
    assert_eq!(kinds(&sent), vec![PacketType::ChunkRequest]);
    assert!(pair.replica().block(far).is_none());

    // Loaded chunks take the update directly
    let near = BlockLoc::new(1, 1);
    pair.to_client(builders::update_block(near, "gold")).unwrap();
    pair.executor.run_pending();
    assert_eq!(pair.replica().block(near).as_deref(), Some("gold"));
}

#[tokio::test]
async fn test_prediction_corrected_only_beyond_threshold() {
    let mut pair = Pair::new();
    let (_listener, corrections) = record::<EntityCorrected>(&pair.bus);
    pair.login("alice");

    let id = pair.entity_id();
    let replica = pair.replica();
    let predicted = replica.get_entity(&id).unwrap().position;

    // Within the threshold: prediction kept
    let mut near = replica.get_entity(&id).unwrap();
    near.position = Vec2::new(predicted.x + 0.3, predicted.y);
    pair.to_client(builders::move_entity(&near)).unwrap();
    pair.executor.run_pending();
    assert_eq!(replica.get_entity(&id).unwrap().position, predicted);
    assert!(corrections.lock().unwrap().is_empty());

    // Beyond it: hard teleport and physics resync
    let mut far = near.clone();
    far.position = Vec2::new(predicted.x + 2.0, predicted.y);
    far.velocity = Vec2::new(0.0, -3.0);
    pair.to_client(builders::move_entity(&far)).unwrap();
    pair.executor.run_pending();

    let entity = replica.get_entity(&id).unwrap();
    assert_eq!(entity.position, far.position);
    assert_eq!(entity.velocity, far.velocity);
    assert_eq!(replica.body_position(&id), Some(far.position));

    let corrections = corrections.lock().unwrap();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].predicted, predicted);
}

#[tokio::test]
async fn test_duplicate_login_rejected() {
    let world = Arc::new(MemoryWorld::flat("overworld", 42, 3));
    let registry = Arc::new(SessionRegistry::new(8));
    let bus = EventBus::new(64);

    let mut first = Pair::sharing(world.clone(), registry.clone(), bus.clone());
    first.login("alice");
    assert_eq!(first.client.phase(), HandshakePhase::Playing);

    let mut second = Pair::sharing(world, registry.clone(), bus);
    second.login("alice");

    assert!(second.client.is_closed());
    assert!(second.server.is_closed());
    let expected = format!("Login rejected: {}", LoginStatusKind::AlreadyLoggedIn.name());
    assert_eq!(second.screen.current(), Screen::Disconnected { reason: expected });

    // The first session is untouched
    assert!(!first.client.is_closed());
    assert!(registry.is_logged_in("alice"));
}

#[tokio::test]
async fn test_full_server_rejects_login() {
    let world = Arc::new(MemoryWorld::flat("overworld", 42, 3));
    let registry = Arc::new(SessionRegistry::new(1));
    let bus = EventBus::new(64);

    let mut first = Pair::sharing(world.clone(), registry.clone(), bus.clone());
    first.login("alice");
    let mut second = Pair::sharing(world, registry, bus);
    second.login("bob");

    assert!(second.client.is_closed());
    assert!(matches!(
        second.screen.current(),
        Screen::Disconnected { reason } if reason.contains(LoginStatusKind::FullServer.name())
    ));
}

#[tokio::test(start_paused = true)]
async fn test_liveness_timeout_fires_once() {
    let mut pair = Pair::new();
    let (_listener, closed) = record::<Disconnected>(&pair.bus);
    pair.login("alice");

    // Nothing is pumped, so neither side hears the other's heartbeats
    tokio::time::sleep(Duration::from_millis(11_500)).await;
    assert!(pair.client.is_closed());
    assert!(pair.server.is_closed());

    tokio::time::sleep(Duration::from_secs(5)).await;
    let closed = closed.lock().unwrap();
    let client: Vec<&Disconnected> = closed.iter().filter(|d| d.peer == "client").collect();
    assert_eq!(client.len(), 1);
    assert!(client[0].fatal);
    assert_eq!(client[0].reason, constants::REASON_STOPPED_RESPONDING);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_session_alive() {
    let mut pair = Pair::new();
    pair.login("alice");

    for _ in 0..30 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        pair.pump();
    }
    assert_eq!(pair.client.phase(), HandshakePhase::Playing);
    assert_eq!(pair.server.phase(), HandshakePhase::Playing);
}

#[tokio::test]
async fn test_rearming_replaces_heartbeat_task() {
    let mut pair = Pair::new();
    pair.login("alice");
    let state = pair.client.shared().unwrap();

    pair.client.arm_heartbeat().unwrap();
    pair.client.arm_heartbeat().unwrap();

    assert_eq!(state.heartbeat_cancellations(), 2);
    assert!(state.has_heartbeat_task());
}

#[tokio::test]
async fn test_breaking_progress_expires() {
    let mut pair = Pair::new();
    pair.login("alice");

    let loc = BlockLoc::new(2, -1);
    pair.to_client(builders::breaking_progress(loc, 0.4)).unwrap();
    assert_eq!(pair.client.breaking_progress(loc), Some(0.4));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pair.client.breaking_progress(loc), None);
}
