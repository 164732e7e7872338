//! Fuzz target for replication frame decoding.
//!
//! This tests that `Snapshot::decode` never panics on arbitrary input, and
//! that anything it accepts re-encodes to a frame that decodes again.

#![no_main]

use broker_engine::replication::Snapshot;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(snapshot) = Snapshot::decode(data) {
        let frame = snapshot.encode().unwrap();
        assert!(Snapshot::decode(&frame).is_ok());
    }
});
