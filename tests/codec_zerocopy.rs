//! Integration tests for the length-delimited packet codec
//!
//! These tests drive the codec the way a socket does: frames arrive split,
//! coalesced, or malformed, and the buffer must only ever be consumed one
//! whole frame at a time.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use world_session::core::codec::{decode_frame, encode_frame, PacketCodec};
use world_session::core::packet::{Direction, Packet, PacketType};
use world_session::error::SessionError;
use world_session::protocol::builders;
use world_session::world::{ChunkLoc, ChunkSnapshot};

fn chunk_packet() -> Packet {
    let mut chunk = ChunkSnapshot::empty(ChunkLoc::new(3, -7));
    for (i, block) in chunk.blocks.iter_mut().enumerate() {
        if i % 3 == 0 {
            *block = "stone".to_string();
        }
    }
    Packet::new(Direction::Client, builders::update_chunk(&chunk))
}

#[test]
fn test_decode_consumes_exactly_one_frame() {
    let mut codec = PacketCodec::default();
    let mut buffer = BytesMut::new();
    codec.encode(chunk_packet(), &mut buffer).unwrap();
    codec
        .encode(Packet::new(Direction::Client, builders::heartbeat()), &mut buffer)
        .unwrap();

    let first = codec.decode(&mut buffer).unwrap().unwrap();
    assert_eq!(first.kind().unwrap(), PacketType::UpdateChunk);
    assert!(!buffer.is_empty());

    let second = codec.decode(&mut buffer).unwrap().unwrap();
    assert_eq!(second.kind().unwrap(), PacketType::Heartbeat);
    assert!(buffer.is_empty());
    assert!(codec.decode(&mut buffer).unwrap().is_none());
}

#[test]
fn test_byte_by_byte_delivery() {
    let frame = encode_frame(&chunk_packet()).unwrap();
    let mut codec = PacketCodec::default();
    let mut buffer = BytesMut::new();

    for (i, byte) in frame.iter().enumerate() {
        buffer.put_u8(*byte);
        let decoded = codec.decode(&mut buffer).unwrap();
        if i + 1 < frame.len() {
            assert!(decoded.is_none(), "decoded early at byte {i}");
        } else {
            assert_eq!(decoded.unwrap(), chunk_packet());
        }
    }
}

#[test]
fn test_partial_frame_is_left_in_buffer() {
    let frame = encode_frame(&chunk_packet()).unwrap();
    let mut buffer = BytesMut::from(&frame[..frame.len() / 2]);
    let before = buffer.len();

    let mut codec = PacketCodec::default();
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.len(), before);
    // Space for the rest of the body is reserved up front
    assert!(buffer.capacity() >= frame.len());
}

#[test]
fn test_oversized_prefix_rejected_before_body_arrives() {
    let mut codec = PacketCodec::new(1024);
    let mut buffer = BytesMut::new();
    // varint 1_000_000, no body
    buffer.put_slice(&[0xC0, 0x84, 0x3D]);

    assert!(matches!(
        codec.decode(&mut buffer),
        Err(SessionError::OversizedPacket(1_000_000))
    ));
}

#[test]
fn test_encoder_refuses_oversized_packet() {
    let mut codec = PacketCodec::new(64);
    let mut buffer = BytesMut::new();
    let result = codec.encode(chunk_packet(), &mut buffer);

    assert!(matches!(result, Err(SessionError::OversizedPacket(_))));
    assert!(buffer.is_empty());
}

#[test]
fn test_overlong_varint_is_invalid() {
    let mut codec = PacketCodec::default();
    let mut buffer = BytesMut::from(&[0xFF; 11][..]);
    assert!(matches!(
        codec.decode(&mut buffer),
        Err(SessionError::InvalidFrame(_))
    ));
}

#[test]
fn test_garbage_body_is_decode_error() {
    let mut buffer = BytesMut::new();
    buffer.put_u8(4);
    buffer.put_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

    let mut codec = PacketCodec::default();
    assert!(matches!(codec.decode(&mut buffer), Err(SessionError::Decode(_))));
}

#[test]
fn test_decode_frame_rejects_trailing_bytes() {
    let mut frame = encode_frame(&chunk_packet()).unwrap().to_vec();
    assert!(decode_frame(&frame).is_ok());

    frame.push(0);
    assert!(matches!(decode_frame(&frame), Err(SessionError::InvalidFrame(_))));
    assert!(decode_frame(&frame[..frame.len() - 5]).is_err());
}

#[test]
fn test_empty_envelope_decodes_but_does_not_validate() {
    // A zero-length body is a valid protobuf message with every field unset
    let packet = decode_frame(&[0x00]).unwrap();
    assert!(matches!(
        packet.validate(Direction::Client),
        Err(SessionError::UnrecognizedPacket(0))
    ));
}
