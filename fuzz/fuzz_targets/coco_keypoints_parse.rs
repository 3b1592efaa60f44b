//! Fuzz target for COCO keypoints JSON parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use poselab::codec::io_coco_keypoints::from_coco_str;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = from_coco_str(text);
    }
});
