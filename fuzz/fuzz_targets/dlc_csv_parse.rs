//! Fuzz target for DLC-style CSV parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use poselab::codec::io_dlc_csv::from_dlc_str;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = from_dlc_str(text);
    }
});
