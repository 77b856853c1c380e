//! Compression facade: a uniform `(kind, span) -> span` interface over
//! pluggable bulk codecs. The core only orchestrates invocation; it never
//! implements a compression algorithm itself.

use crate::error::{Error, Result};
use crate::header::CompressionKind;

/// Compresses `input` under `kind`. `kind = None` returns the input
/// unchanged, per spec.
pub fn compress(kind: CompressionKind, input: &[u8]) -> Result<Vec<u8>> {
    tracing::trace!(?kind, input_len = input.len(), "compressing payload");
    match kind {
        CompressionKind::None => Ok(input.to_vec()),
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(input)),
        CompressionKind::Lz4Best => {
            // LZ4 has no separate "best" frontend in lz4_flex; the two
            // kinds differ only by compression effort and decompress
            // identically, so kind 2 reuses kind 1's encoder. A
            // higher-effort LZ4 encoder could be swapped in here without
            // changing the wire format.
            Ok(lz4_flex::compress_prepend_size(input))
        }
        CompressionKind::Gzip => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(input)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decompresses `input`, which was produced by `compress(kind, ...)`.
/// `expected_len` bounds allocation for codecs (like gzip) that don't embed
/// the uncompressed length up front.
pub fn decompress(kind: CompressionKind, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    tracing::trace!(?kind, input_len = input.len(), expected_len, "decompressing payload");
    match kind {
        CompressionKind::None => Ok(input.to_vec()),
        CompressionKind::Lz4 | CompressionKind::Lz4Best => {
            lz4_flex::decompress_size_prepended(input)
                .map_err(|e| Error::MalformedHeader(format!("lz4 decode failed: {e}")))
        }
        CompressionKind::Gzip => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(input);
            let mut out = Vec::with_capacity(expected_len);
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let data = b"hello world".to_vec();
        let out = compress(CompressionKind::None, &data).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn lz4_round_trips() {
        let data = vec![7u8; 4096];
        let compressed = compress(CompressionKind::Lz4, &data).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = decompress(CompressionKind::Lz4, &compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(CompressionKind::Gzip, &data).unwrap();
        let decompressed = decompress(CompressionKind::Gzip, &compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }
}
