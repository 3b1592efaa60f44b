//! Fuzz target for Label Studio task-export JSON parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use poselab::codec::io_label_studio::{from_label_studio_str, LabelStudioOptions};

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = from_label_studio_str(text, &LabelStudioOptions::default());
    }
});
