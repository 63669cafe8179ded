//! Fuzz target for frame header parsing and message classification.
//!
//! Run with: cargo +nightly fuzz run fuzz_frame_header

#![no_main]

use diffscope_core::lsp::codec::{MAX_BODY_BYTES, parse_header_block};
use diffscope_core::lsp::Incoming;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(block) = std::str::from_utf8(data) {
        if let Ok(length) = parse_header_block(block) {
            assert!(length <= MAX_BODY_BYTES);
        }
    }
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = Incoming::classify(value);
    }
});
