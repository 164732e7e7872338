//! Fuzz target for public key armor parsing.

#![no_main]

use broker_engine::pem::{decode_public_key, encode_public_key};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(armor) = std::str::from_utf8(data) {
        let _ = decode_public_key(armor);
    }

    // Armor produced for any non-empty DER blob must parse back to the same bytes
    if !data.is_empty() {
        let armored = encode_public_key(data);
        assert_eq!(decode_public_key(&armored).unwrap(), data);
    }
});
