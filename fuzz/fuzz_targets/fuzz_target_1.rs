#![no_main]

use libfuzzer_sys::fuzz_target;
use world_session::core::codec::decode_frame;
use world_session::core::packet::Direction;

fuzz_target!(|data: &[u8]| {
    // Frame decoding and envelope validation must never panic
    if let Ok(packet) = decode_frame(data) {
        let _ = packet.validate(Direction::Client);
        let _ = packet.validate(Direction::Server);
    }
});
