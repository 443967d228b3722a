use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};
use world_session::core::codec::{decode_frame, encode_frame, PacketCodec};
use world_session::core::packet::{Direction, Packet, PacketType};
use world_session::protocol::{builders, dispatcher, HandshakePhase, Role};
use world_session::world::memory::MemoryWorld;
use world_session::world::{ChunkLoc, ChunkSnapshot, EntityState, Vec2, WorldStore};

fn sample_packets() -> Vec<(&'static str, Packet)> {
    let world = MemoryWorld::flat("bench", 1, 0);
    let origin = ChunkLoc::new(0, 0);
    let chunk = world
        .get_chunk(origin)
        .unwrap_or_else(|| ChunkSnapshot::empty(origin));
    let mut entity = EntityState::new("0f7c", "player", Vec2::new(12.5, 3.0));
    entity.velocity = Vec2::new(0.5, -9.8);

    vec![
        ("heartbeat", Packet::new(Direction::Server, builders::heartbeat())),
        ("move_entity", Packet::new(Direction::Client, builders::move_entity(&entity))),
        ("update_chunk", Packet::new(Direction::Client, builders::update_chunk(&chunk))),
    ]
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");

    for (name, packet) in sample_packets() {
        let frame = encode_frame(&packet).unwrap();
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_function(format!("encode_{name}"), |b| {
            b.iter_batched(
                || packet.clone(),
                |p| {
                    let mut buf = BytesMut::with_capacity(frame.len());
                    let mut codec = PacketCodec::default();
                    codec.encode(p, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{name}"), |b| {
            b.iter_batched(
                || BytesMut::from(&frame[..]),
                |mut buf| {
                    let mut codec = PacketCodec::default();
                    assert!(codec.decode(&mut buf).unwrap().is_some());
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_frame_{name}"), |b| {
            b.iter(|| decode_frame(&frame).unwrap())
        });
    }

    group.finish();
}

fn bench_routing(c: &mut Criterion) {
    let kinds = [
        PacketType::Heartbeat,
        PacketType::MoveEntity,
        PacketType::UpdateChunk,
        PacketType::EntityRequest,
    ];
    c.bench_function("route_playing", |b| {
        b.iter(|| {
            for kind in kinds {
                std::hint::black_box(dispatcher::route(Role::Client, HandshakePhase::Playing, kind));
                std::hint::black_box(dispatcher::route(Role::Server, HandshakePhase::Playing, kind));
            }
        })
    });
}

criterion_group!(benches, bench_packet_encode_decode, bench_routing);
criterion_main!(benches);
