//! Block compression applied to serialized payloads.
//!
//! There is no per-frame flag on the wire: both ends of a connection must agree out of band on
//! whether compression is on and which [`CompressionKind`] is used.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Block compressor used by the payload pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }
}

/// Compresses data using the specified compression algorithm.
///
/// `level` only applies to Zstd; LZ4 has a single speed/ratio setting.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, level)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm.
///
/// Enforces `max_output` as an upper bound on the decompressed size so a small malicious frame
/// cannot expand into an arbitrarily large allocation.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - the input is malformed
/// - the output would exceed `max_output`
pub fn decompress(data: &[u8], kind: CompressionKind, max_output: usize) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4 little-endian bytes;
            // check it before lz4_flex allocates the output buffer
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }

            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > max_output {
                return Err(ProtocolError::DecompressionFailure);
            }

            lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            use std::io::Read;

            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            // Read in chunks to enforce the size limit
            let mut out = Vec::new();
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > max_output {
                            return Err(ProtocolError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 16 * 1024 * 1024;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_compression_roundtrip() {
        let original = b"Hello, World! This is a test of LZ4 compression.";
        let compressed = compress(original, CompressionKind::Lz4, 0).unwrap();
        let decompressed = decompress(&compressed, CompressionKind::Lz4, LIMIT).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_compression_roundtrip() {
        let original = b"Hello, World! This is a test of Zstd compression.";
        let compressed = compress(original, CompressionKind::Zstd, 3).unwrap();
        let decompressed = decompress(&compressed, CompressionKind::Zstd, LIMIT).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_lz4_oom_attack_prevention() {
        // Claims to decompress to 0xbbbb602b bytes
        let malicious_payload = vec![0x2b, 0x60, 0xbb, 0xbb];
        let result = decompress(&malicious_payload, CompressionKind::Lz4, LIMIT);
        assert!(result.is_err());
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        let result = decompress(&[0x2b, 0x60], CompressionKind::Lz4, LIMIT);
        assert!(matches!(result, Err(ProtocolError::DecompressionFailure)));
    }

    #[test]
    fn test_malformed_compressed_data() {
        let malformed = vec![0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff];
        let result = decompress(&malformed, CompressionKind::Lz4, LIMIT);
        assert!(result.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_output_limit_enforced() {
        let data = vec![0u8; 64 * 1024];
        let compressed = compress(&data, CompressionKind::Zstd, 3).unwrap();
        let result = decompress(&compressed, CompressionKind::Zstd, 1024);
        assert!(matches!(result, Err(ProtocolError::DecompressionFailure)));
    }

    #[test]
    fn test_zstd_garbage_rejected() {
        let result = decompress(b"definitely not zstd", CompressionKind::Zstd, LIMIT);
        assert!(result.is_err());
    }
}
