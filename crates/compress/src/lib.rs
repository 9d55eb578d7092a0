//! Gzip framing for `-z` block payload compression.
//!
//! A thin, fallible wrapper over `flate2` used by the server to compress
//! block payloads when `-z` is set, and by the client to decompress them
//! when a block header carries `z:"1"`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("gzip compression failed: {0}")]
    Encode(#[source] std::io::Error),
    #[error("gzip decompression failed: {0}")]
    Decode(#[source] std::io::Error),
}

/// Compresses `data` with gzip at the default compression level.
///
/// On failure the caller is expected to drop the affected block and log at
/// error level; this function just surfaces the error, it doesn't log or
/// drop anything itself.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CompressError::Encode)?;
    encoder.finish().map_err(CompressError::Encode)
}

/// Decompresses a gzip-framed block payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CompressError::Decode)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn decompressing_garbage_fails() {
        assert!(decompress(b"not gzip data").is_err());
    }

    #[test]
    fn round_trips_empty_input() {
        let compressed = compress(&[]).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), Vec::<u8>::new());
    }
}
