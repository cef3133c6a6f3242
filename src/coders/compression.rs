//! # Compression Codec
//!
//! Pluggable per-layer compression. Each region file header carries the
//! tag of the [`Method`] its blobs were written with.
//!
//! Voxel and light arrays are dominated by long uniform runs, so the
//! run-length variants cover them; gzip is reserved for less regular
//! secondary payloads such as block metadata.

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use num_derive::FromPrimitive;

use super::rle;
use crate::error::{Result, StorageError};

/// Compression method tag stored in region file headers.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Method {
    /// Blobs are stored as-is.
    None = 0,
    /// Extended run-length encoding over bytes.
    ExtRle8 = 1,
    /// Extended run-length encoding over little-endian `u16` symbols.
    ExtRle16 = 2,
    /// Gzip stream.
    Gzip = 3,
    /// Plain run-length encoding over bytes (legacy files).
    Rle8 = 4,
    /// Plain run-length encoding over `u16` symbols (legacy files).
    Rle16 = 5,
}

impl Method {
    /// All methods, in tag order.
    pub const ALL: [Method; 6] = [
        Method::None,
        Method::ExtRle8,
        Method::ExtRle16,
        Method::Gzip,
        Method::Rle8,
        Method::Rle16,
    ];

    /// Decodes a header tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(tag)
    }

    /// Header tag of this method.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Compresses `src` with the given method.
///
/// # Errors
/// 16-bit run-length methods reject input of odd length.
pub fn compress(src: &[u8], method: Method) -> Result<Vec<u8>> {
    match method {
        Method::None => Ok(src.to_vec()),
        Method::ExtRle8 => Ok(rle::extrle8_encode(src)),
        Method::ExtRle16 => rle::extrle16_encode(src),
        Method::Rle8 => Ok(rle::encode8(src)),
        Method::Rle16 => rle::encode16(src),
        Method::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(src)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decompresses `src`, requiring the result to be exactly `expected` bytes.
///
/// A size mismatch is reported as [`StorageError::DecompressionMismatch`]
/// and is treated as corruption by every caller.
pub fn decompress(src: &[u8], expected: usize, method: Method) -> Result<Vec<u8>> {
    match method {
        Method::None => {
            if src.len() != expected {
                return Err(StorageError::DecompressionMismatch {
                    expected,
                    actual: src.len(),
                });
            }
            Ok(src.to_vec())
        }
        Method::ExtRle8 => rle::extrle8_decode(src, expected),
        Method::ExtRle16 => rle::extrle16_decode(src, expected),
        Method::Rle8 => rle::decode8(src, expected),
        Method::Rle16 => rle::decode16(src, expected),
        Method::Gzip => {
            // one byte past the expected size is enough to report a mismatch
            let mut decoder = GzDecoder::new(src).take((expected as u64).saturating_add(1));
            let mut dst = rle::output_buffer(expected);
            decoder
                .read_to_end(&mut dst)
                .map_err(|err| StorageError::Corrupted(format!("gzip stream: {err}")))?;
            if dst.len() != expected {
                return Err(StorageError::DecompressionMismatch {
                    expected,
                    actual: dst.len(),
                });
            }
            Ok(dst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn runs(pattern: &[(u16, usize)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &(symbol, count) in pattern {
            for _ in 0..count {
                bytes.extend_from_slice(&symbol.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn empty_input_roundtrips_for_every_method() {
        for method in Method::ALL {
            let compressed = compress(&[], method).unwrap();
            assert_eq!(decompress(&compressed, 0, method).unwrap(), Vec::<u8>::new());
        }
    }

    #[test]
    fn runs_crossing_symbol_count_boundaries() {
        let src = runs(&[(1, 255), (2, 256), (3, 257), (4, 65535), (5, 65536), (6, 65537)]);
        for method in Method::ALL {
            let compressed = compress(&src, method).unwrap();
            assert_eq!(decompress(&compressed, src.len(), method).unwrap(), src);
        }
    }

    #[test]
    fn tags_roundtrip() {
        for method in Method::ALL {
            assert_eq!(Method::from_tag(method.tag()), Some(method));
        }
        assert_eq!(Method::from_tag(42), None);
    }

    #[test]
    fn gzip_size_mismatch_is_corruption() {
        let compressed = compress(b"secondary payload", Method::Gzip).unwrap();
        assert!(matches!(
            decompress(&compressed, 5, Method::Gzip),
            Err(StorageError::DecompressionMismatch { expected: 5, .. })
        ));
    }

    #[test]
    fn declared_size_does_not_drive_allocation() {
        for method in Method::ALL {
            let compressed = compress(b"tiny", method).unwrap();
            assert!(matches!(
                decompress(&compressed, usize::MAX / 2, method),
                Err(StorageError::DecompressionMismatch { actual: 4, .. })
            ));
        }
    }

    #[test]
    fn gzip_output_stops_past_the_declared_size() {
        let compressed = compress(&[7; 4096], Method::Gzip).unwrap();
        assert!(matches!(
            decompress(&compressed, 16, Method::Gzip),
            Err(StorageError::DecompressionMismatch { expected: 16, actual: 17 })
        ));
    }

    #[test]
    fn uniform_voxels_compress_well() {
        let src = runs(&[(0, 60000), (17, 5536)]);
        let compressed = compress(&src, Method::ExtRle16).unwrap();
        assert!(compressed.len() < 32);
    }

    proptest! {
        #[test]
        fn every_method_roundtrips(words in proptest::collection::vec(0u16..4, 0..2000)) {
            let src: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
            for method in Method::ALL {
                let compressed = compress(&src, method).unwrap();
                prop_assert_eq!(decompress(&compressed, src.len(), method).unwrap(), src.clone());
            }
        }
    }
}
