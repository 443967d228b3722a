//! Concurrency tests: event bus races, actor routing and codec throughput
//! under a multi-threaded runtime.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, Encoder};
use world_session::core::codec::PacketCodec;
use world_session::core::packet::{Direction, Packet};
use world_session::events::types::{PlayerJoined, WorldReady};
use world_session::events::EventBus;
use world_session::protocol::builders;
use world_session::runtime::{affinity, Actor, ActorRuntime, Executor};
use world_session::world::{EntityState, Vec2};

fn ready() -> WorldReady {
    WorldReady {
        entity_id: "e1".into(),
    }
}

#[test]
fn once_listener_fires_once_under_racing_dispatch() {
    for _ in 0..20 {
        let bus = EventBus::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registration = bus.register_once::<WorldReady, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let bus = bus.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        bus.dispatch(ready());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count::<WorldReady>(), 0);
        assert!(!registration.is_active());
    }
}

#[test]
fn weak_listener_dropped_while_dispatching() {
    let bus = EventBus::new(0);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let listener = Arc::new(move |_: &PlayerJoined| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    bus.register::<PlayerJoined, _>(&listener);

    let dispatcher = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            for i in 0..10_000 {
                bus.dispatch(PlayerJoined {
                    username: format!("p{i}"),
                    entity_id: "e".into(),
                });
            }
        })
    };
    std::thread::sleep(Duration::from_millis(1));
    drop(listener);
    dispatcher.join().unwrap();

    let after = bus.dispatch(PlayerJoined {
        username: "late".into(),
        entity_id: "e".into(),
    });
    assert_eq!(after, 0);
    assert_eq!(bus.listener_count::<PlayerJoined>(), 0);
    assert!(hits.load(Ordering::Relaxed) <= 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn actor_runtime_routes_jobs_to_their_actor() {
    let runtime = ActorRuntime::start_current(2).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let actors = [Actor::Main, Actor::Ticker, Actor::Physics, Actor::Async, Actor::Io];
    for actor in actors {
        let tx = tx.clone();
        runtime
            .post(
                actor,
                Box::new(move || {
                    let _ = tx.send((actor, affinity::current()));
                }),
            )
            .unwrap();
    }
    drop(tx);

    let mut seen = Vec::new();
    while let Some(pair) = rx.recv().await {
        seen.push(pair);
    }
    assert_eq!(seen.len(), actors.len());
    assert!(seen.iter().all(|(posted, ran_on)| posted == ran_on));

    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn actor_runtime_rejects_unknown_actor() {
    let runtime = ActorRuntime::start_current(1).unwrap();
    assert!(runtime.post(Actor::Unknown, Box::new(|| {})).is_err());
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    let iterations = 5_000usize;
    let mut tasks = JoinSet::new();

    for worker in 0..8i32 {
        tasks.spawn(async move {
            let mut codec = PacketCodec::default();
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let mut entity = EntityState::new(format!("e{worker}-{i}"), "npc", Vec2::ZERO);
                entity.position = Vec2::new(i as f32, worker as f32);
                let packet = Packet::new(Direction::Client, builders::move_entity(&entity));

                codec.encode(packet.clone(), &mut buf).unwrap();
                let decoded = codec.decode(&mut buf).unwrap().unwrap();
                assert_eq!(decoded, packet);
                assert!(buf.is_empty());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}
