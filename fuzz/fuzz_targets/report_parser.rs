#![no_main]

use cubrir::CoverageMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // A persisted snapshot may be arbitrarily truncated or corrupted
    // by a killed process; parsing must never panic, and anything
    // that does parse must survive a merge
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(map) = serde_json::from_str::<CoverageMap>(input) {
            let mut merged = CoverageMap::new();
            merged.merge(map.clone());
            merged.merge(map);
        }
    }
});
