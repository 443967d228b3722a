#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use world_session::core::codec::decode_frame;
use world_session::runtime::ManualExecutor;
use world_session::world::memory::MemoryWorld;
use world_session::{ConnectionBuilder, EventBus, SessionConfig};

fuzz_target!(|data: &[u8]| {
    // Arbitrary frames fed to a fresh server connection
    let Ok(packet) = decode_frame(data) else {
        return;
    };
    let executor = Arc::new(ManualExecutor::new());
    let Ok((server, _outbound)) = ConnectionBuilder::server(Arc::new(SessionConfig::default()))
        .executor(executor.clone())
        .bus(EventBus::new(0))
        .world(Arc::new(MemoryWorld::flat("fuzz", 0, 0)))
        .build()
    else {
        return;
    };
    let _ = server.receive(packet);
    executor.run_pending();
});
