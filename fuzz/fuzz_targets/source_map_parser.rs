#![no_main]

use cubrir::SourceMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed source map data must be treated as absent, never as
    // a panic or an error
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = SourceMap::from_json(input);
    }
});
