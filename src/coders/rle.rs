//! # Run-Length Codecs
//!
//! Four run-length variants used for chunk payloads:
//!
//! * `rle8` / `rle16` - plain `(count - 1, symbol)` pairs. The count is a
//!   single byte for 8-bit symbols and a little-endian `u16` for 16-bit
//!   symbols. Only legacy region files use these.
//! * `extrle8` / `extrle16` - the count is stored in 7 bits; when the high
//!   bit is set a continuation byte carries bits 7..14, so runs up to
//!   32768 symbols cost at most two bytes without widening the symbol.
//!
//! 16-bit symbols are read from and written to byte buffers in little-endian
//! order. Decoders always know the expected output size and fail if the
//! stream produces more or fewer bytes.

use byteorder::{ByteOrder, LittleEndian};

use super::byte_codec::{ByteReader, Endian};
use crate::error::{Result, StorageError};

/// Longest run representable by the plain 8-bit codec.
pub const RLE8_MAX_RUN: usize = 0x100;
/// Longest run representable by the plain 16-bit codec.
pub const RLE16_MAX_RUN: usize = 0x10000;
/// Longest run representable by the extended codecs.
pub const EXTRLE_MAX_RUN: usize = 0x8000;

/// Upper bound on the capacity reserved up front from a declared output
/// size. Larger outputs grow as they are decoded.
pub const MAX_PREALLOCATION: usize = 1 << 20;

/// Output buffer for a decoder that expects `expected` bytes.
pub(super) fn output_buffer(expected: usize) -> Vec<u8> {
    Vec::with_capacity(expected.min(MAX_PREALLOCATION))
}

fn le16(value: u16) -> [u8; 2] {
    let mut bytes = [0; 2];
    LittleEndian::write_u16(&mut bytes, value);
    bytes
}

/// Splits `symbols` into runs no longer than `max_run`.
fn for_each_run<T, I, F>(symbols: I, max_run: usize, mut emit: F)
where
    T: PartialEq + Copy,
    I: IntoIterator<Item = T>,
    F: FnMut(usize, T),
{
    let mut current: Option<(T, usize)> = None;
    for symbol in symbols {
        current = match current {
            Some((run_symbol, count)) if run_symbol == symbol && count < max_run => {
                Some((run_symbol, count + 1))
            }
            Some((run_symbol, count)) => {
                emit(count, run_symbol);
                Some((symbol, 1))
            }
            None => Some((symbol, 1)),
        };
    }
    if let Some((run_symbol, count)) = current {
        emit(count, run_symbol);
    }
}

fn symbols16(src: &[u8]) -> Result<impl Iterator<Item = u16> + '_> {
    if src.len() % 2 != 0 {
        return Err(StorageError::InvalidInput(format!(
            "16-bit run-length codec requires even input length, got {}",
            src.len()
        )));
    }
    Ok(src
        .chunks_exact(2)
        .map(LittleEndian::read_u16))
}

fn put_ext_count(dst: &mut Vec<u8>, count: usize) {
    let value = count - 1;
    if value < 0x80 {
        dst.push(value as u8);
    } else {
        dst.push(0x80 | (value & 0x7F) as u8);
        dst.push((value >> 7) as u8);
    }
}

fn get_ext_count(reader: &mut ByteReader) -> Result<usize> {
    let first = reader.get_u8()? as usize;
    if first & 0x80 == 0 {
        return Ok(first + 1);
    }
    let second = reader.get_u8()? as usize;
    Ok(((first & 0x7F) | (second << 7)) + 1)
}

fn push_run(dst: &mut Vec<u8>, symbol: &[u8], count: usize, expected: usize) -> Result<()> {
    let produced = dst.len() + symbol.len() * count;
    if produced > expected {
        return Err(StorageError::DecompressionMismatch {
            expected,
            actual: produced,
        });
    }
    for _ in 0..count {
        dst.extend_from_slice(symbol);
    }
    Ok(())
}

fn finish(dst: Vec<u8>, expected: usize) -> Result<Vec<u8>> {
    if dst.len() != expected {
        return Err(StorageError::DecompressionMismatch {
            expected,
            actual: dst.len(),
        });
    }
    Ok(dst)
}

/// Encodes bytes as `(count - 1, symbol)` pairs.
pub fn encode8(src: &[u8]) -> Vec<u8> {
    let mut dst = Vec::new();
    for_each_run(src.iter().copied(), RLE8_MAX_RUN, |count, symbol| {
        dst.push((count - 1) as u8);
        dst.push(symbol);
    });
    dst
}

/// Decodes [`encode8`] output into exactly `expected` bytes.
pub fn decode8(src: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(src);
    let mut dst = output_buffer(expected);
    while reader.has_next() {
        let count = reader.get_u8()? as usize + 1;
        let symbol = reader.get_u8()?;
        push_run(&mut dst, &[symbol], count, expected)?;
    }
    finish(dst, expected)
}

/// Encodes little-endian `u16` symbols as `(count - 1, symbol)` pairs.
pub fn encode16(src: &[u8]) -> Result<Vec<u8>> {
    let mut dst = Vec::new();
    for_each_run(symbols16(src)?, RLE16_MAX_RUN, |count, symbol| {
        dst.extend_from_slice(&le16((count - 1) as u16));
        dst.extend_from_slice(&le16(symbol));
    });
    Ok(dst)
}

/// Decodes [`encode16`] output into exactly `expected` bytes.
pub fn decode16(src: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(src).with_endian(Endian::Little);
    let mut dst = output_buffer(expected);
    while reader.has_next() {
        let count = reader.get_u16()? as usize + 1;
        let symbol = reader.get_u16()?;
        push_run(&mut dst, &le16(symbol), count, expected)?;
    }
    finish(dst, expected)
}

/// Encodes bytes with 7-bit run counts and a continuation byte.
pub fn extrle8_encode(src: &[u8]) -> Vec<u8> {
    let mut dst = Vec::new();
    for_each_run(src.iter().copied(), EXTRLE_MAX_RUN, |count, symbol| {
        put_ext_count(&mut dst, count);
        dst.push(symbol);
    });
    dst
}

/// Decodes [`extrle8_encode`] output into exactly `expected` bytes.
pub fn extrle8_decode(src: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(src);
    let mut dst = output_buffer(expected);
    while reader.has_next() {
        let count = get_ext_count(&mut reader)?;
        let symbol = reader.get_u8()?;
        push_run(&mut dst, &[symbol], count, expected)?;
    }
    finish(dst, expected)
}

/// Encodes little-endian `u16` symbols with extended run counts.
pub fn extrle16_encode(src: &[u8]) -> Result<Vec<u8>> {
    let mut dst = Vec::new();
    for_each_run(symbols16(src)?, EXTRLE_MAX_RUN, |count, symbol| {
        put_ext_count(&mut dst, count);
        dst.extend_from_slice(&le16(symbol));
    });
    Ok(dst)
}

/// Decodes [`extrle16_encode`] output into exactly `expected` bytes.
pub fn extrle16_decode(src: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(src).with_endian(Endian::Little);
    let mut dst = output_buffer(expected);
    while reader.has_next() {
        let count = get_ext_count(&mut reader)?;
        let symbol = reader.get_u16()?;
        push_run(&mut dst, &le16(symbol), count, expected)?;
    }
    finish(dst, expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_rle8_splits_long_runs() {
        let src = vec![7u8; 300];
        let encoded = encode8(&src);
        assert_eq!(encoded, vec![255, 7, 43, 7]);
        assert_eq!(decode8(&encoded, 300).unwrap(), src);
    }

    #[test]
    fn extended_count_uses_continuation_byte() {
        let src = vec![1u8; 200];
        let encoded = extrle8_encode(&src);
        // 199 = 0b1_1000111 -> 0x80 | 0x47, 0x01
        assert_eq!(encoded, vec![0xC7, 0x01, 1]);
        assert_eq!(extrle8_decode(&encoded, 200).unwrap(), src);
    }

    #[test]
    fn extended_runs_cap_at_max() {
        let src = vec![3u8; EXTRLE_MAX_RUN + 5];
        let encoded = extrle8_encode(&src);
        assert_eq!(encoded, vec![0xFF, 0xFF, 3, 4, 3]);
        assert_eq!(extrle8_decode(&encoded, src.len()).unwrap(), src);
    }

    #[test]
    fn extrle16_keeps_symbols_whole() {
        let mut src = Vec::new();
        for _ in 0..1000 {
            src.extend_from_slice(&0x1234u16.to_le_bytes());
        }
        src.extend_from_slice(&0xFFFFu16.to_le_bytes());
        let encoded = extrle16_encode(&src).unwrap();
        assert_eq!(encoded.len(), 2 + 2 + 1 + 2);
        assert_eq!(extrle16_decode(&encoded, src.len()).unwrap(), src);
    }

    #[test]
    fn odd_input_is_rejected_by_16_bit_codecs() {
        assert!(matches!(
            extrle16_encode(&[1, 2, 3]),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(encode16(&[1]), Err(StorageError::InvalidInput(_))));
    }

    #[test]
    fn decoding_more_than_expected_fails() {
        let encoded = extrle8_encode(&[5u8; 10]);
        assert!(matches!(
            extrle8_decode(&encoded, 9),
            Err(StorageError::DecompressionMismatch {
                expected: 9,
                actual: 10
            })
        ));
    }

    #[test]
    fn decoding_less_than_expected_fails() {
        let encoded = encode8(&[5u8; 10]);
        assert!(matches!(
            decode8(&encoded, 11),
            Err(StorageError::DecompressionMismatch {
                expected: 11,
                actual: 10
            })
        ));
    }

    #[test]
    fn truncated_pair_underflows() {
        assert!(matches!(
            decode16(&[0, 0, 1], 2),
            Err(StorageError::BufferUnderflow { .. })
        ));
        assert!(matches!(
            extrle8_decode(&[0x80], 1),
            Err(StorageError::BufferUnderflow { .. })
        ));
    }
}
