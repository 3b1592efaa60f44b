//! Fuzz target for native container parsing.
//!
//! Feeds arbitrary byte sequences to the native decoder, checking for
//! panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use poselab::codec::io_native::from_native_str;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = from_native_str(text);
    }
});
