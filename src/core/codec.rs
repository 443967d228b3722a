//! Length-delimited protobuf framing for Tokio streams.
//!
//! Each frame is a protobuf varint length followed by an encoded [`Packet`].
//! This matches `prost::Message::encode_length_delimited`, so frames written
//! by any protobuf implementation using the standard delimiter decode here.

use bytes::{Buf, Bytes, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_PACKET_SIZE;
use crate::core::packet::Packet;
use crate::error::{constants, Result, SessionError};

/// Longest valid varint encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

/// Read the length prefix without consuming it.
///
/// Returns `Ok(None)` while the prefix is still incomplete, otherwise the body
/// length and the number of prefix bytes.
fn peek_length(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;

    for (i, &byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        // The tenth byte may only carry the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(SessionError::InvalidFrame(
                constants::ERR_INVALID_LENGTH_PREFIX,
            ));
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if src.len() >= MAX_VARINT_LEN {
        return Err(SessionError::InvalidFrame(
            constants::ERR_INVALID_LENGTH_PREFIX,
        ));
    }
    Ok(None)
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((length, prefix_len)) = peek_length(src)? else {
            return Ok(None);
        };

        let length = usize::try_from(length).unwrap_or(usize::MAX);
        if length > self.max_packet_size {
            return Err(SessionError::OversizedPacket(length));
        }

        let total = prefix_len + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let body = src.split_to(length).freeze();
        Ok(Some(Packet::decode(body)?))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = SessionError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let length = item.encoded_len();
        if length > self.max_packet_size {
            return Err(SessionError::OversizedPacket(length));
        }

        dst.reserve(prost::length_delimiter_len(length) + length);
        item.encode_length_delimited(dst)?;
        Ok(())
    }
}

/// Encode one packet into a standalone frame.
pub fn encode_frame(packet: &Packet) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(packet.encoded_len() + MAX_VARINT_LEN);
    PacketCodec::default().encode(packet.clone(), &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one frame. Truncated input or trailing bytes are errors.
pub fn decode_frame(frame: &[u8]) -> Result<Packet> {
    let mut buf = BytesMut::from(frame);
    let packet = PacketCodec::default()
        .decode(&mut buf)?
        .ok_or(SessionError::InvalidFrame("Truncated frame"))?;

    if !buf.is_empty() {
        return Err(SessionError::InvalidFrame("Trailing bytes after frame"));
    }
    Ok(packet)
}
