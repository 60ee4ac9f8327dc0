#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_transport::utils::compression::{compress, decompress, CompressionKind};

const LIMIT: usize = 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
        // Round trip must be lossless and within the limit
        if let Ok(compressed) = compress(data, kind, 3) {
            if data.len() <= LIMIT {
                let restored = decompress(&compressed, kind, LIMIT).expect("round trip");
                assert_eq!(restored, data);
            }
        }

        // Raw input must never panic or exceed the limit
        if let Ok(out) = decompress(data, kind, LIMIT) {
            assert!(out.len() <= LIMIT);
        }
    }
});
