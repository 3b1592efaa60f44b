//! Fuzz target for pose series container parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use poselab::codec::io_nwb_series::from_series_str;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = from_series_str(text);
    }
});
