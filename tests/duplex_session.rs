//! End-to-end sessions over real byte streams, driven by the actor runtime.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use world_session::config::SessionConfig;
use world_session::events::EventBus;
use world_session::protocol::server::SessionRegistry;
use world_session::runtime::{ActorRuntime, Executor};
use world_session::transport::{self, ServerContext};
use world_session::world::memory::MemoryWorld;
use world_session::world::WorldStore;
use world_session::{ConnectionActor, ConnectionBuilder, HandshakePhase};

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn playing(conn: &ConnectionActor) -> bool {
    conn.phase() == HandshakePhase::Playing
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplex_pair_reaches_playing_and_closes_cleanly() {
    let executor: Arc<dyn Executor> = Arc::new(ActorRuntime::start_current(2).unwrap());
    let config = Arc::new(SessionConfig::default());
    let bus = EventBus::new(0);
    let world = Arc::new(MemoryWorld::flat("overworld", 7, 2));
    let registry = Arc::new(SessionRegistry::new(4));

    let (client, client_rx) = ConnectionBuilder::client(config.clone())
        .display_name("client")
        .executor(executor.clone())
        .bus(bus.clone())
        .world_factory(MemoryWorld::factory())
        .build()
        .unwrap();
    let (server, server_rx) = ConnectionBuilder::server(config)
        .display_name("server")
        .executor(executor)
        .bus(bus)
        .world(world.clone())
        .registry(registry.clone())
        .build()
        .unwrap();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client_task = tokio::spawn(transport::attach(client.clone(), client_io, client_rx));
    let server_task = tokio::spawn(transport::attach(server.clone(), server_io, server_rx));

    client.begin_login("alice").unwrap();
    wait_until("both sides playing", || playing(&client) && playing(&server)).await;

    assert!(registry.is_logged_in("alice"));
    let replica = client.world().expect("client world attached");
    let spawn_chunk = replica.info().spawn.block().chunk();
    // Chunk jobs run on the async actor and may trail the end-of-load notice
    wait_until("spawn chunk replicated", || replica.is_chunk_loaded(spawn_chunk)).await;

    assert!(client.dispose());
    wait_until("server to observe the disconnect", || server.is_closed()).await;
    wait_until("world save after the session ends", || world.saves() >= 1).await;
    assert!(!registry.is_logged_in("alice"));

    client_task.await.unwrap().unwrap();
    server_task.await.unwrap().unwrap();

}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_server_shutdown_disconnects_players() {
    let executor: Arc<dyn Executor> = Arc::new(ActorRuntime::start_current(2).unwrap());
    let world = Arc::new(MemoryWorld::flat("overworld", 11, 1));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let config = Arc::new(SessionConfig::default_with_overrides(|c| {
        c.server.view_radius = 1;
        c.server.shutdown_timeout = Duration::from_secs(2);
        c.client.address = address.clone();
    }));

    let world_store: Arc<dyn WorldStore> = world.clone();
    let mut context = ServerContext::new(config.clone(), world_store, executor.clone());
    context.bus = EventBus::new(0);
    let registry = context.registry.clone();

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let server_task = tokio::spawn(transport::serve(listener, context, shutdown_rx));

    let builder = ConnectionBuilder::client(config.clone())
        .executor(executor)
        .bus(EventBus::new(0))
        .world_factory(MemoryWorld::factory());
    let (client, client_task) = transport::connect(&config.client, builder).await.unwrap();

    client.begin_login("bob").unwrap();
    wait_until("client playing", || playing(&client)).await;
    wait_until("server registered the player", || registry.is_logged_in("bob")).await;

    shutdown_tx.send(()).await.unwrap();
    server_task.await.unwrap().unwrap();

    wait_until("client closed", || client.is_closed()).await;
    client_task.await.unwrap().unwrap();
    assert!(registry.is_empty());
    wait_until("session-end save", || world.saves() >= 1).await;

}
