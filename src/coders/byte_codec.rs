//! # Byte Codec
//!
//! Primitive binary encoding used by region files and chunk payloads.
//!
//! `ByteBuilder` appends values to a growable buffer, `ByteReader` consumes
//! them from a borrowed slice. Both default to big-endian (the on-disk order)
//! and can be switched to little-endian for in-memory payload formats.
//! Reads past the end fail with [`StorageError::BufferUnderflow`]; nothing is
//! silently truncated.

use std::mem::size_of;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Result, StorageError};

/// Byte order used for multi-byte values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Endian {
    /// Most significant byte first.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

macro_rules! put_impl {
    ($name:ident, $ty:ty, $write:ident) => {
        #[doc = concat!("Appends a `", stringify!($ty), "` in the builder's byte order.")]
        pub fn $name(&mut self, value: $ty) -> &mut Self {
            let endian = self.endian;
            let dst = self.grow(size_of::<$ty>());
            match endian {
                Endian::Big => BigEndian::$write(dst, value),
                Endian::Little => LittleEndian::$write(dst, value),
            }
            self
        }
    };
}

macro_rules! get_impl {
    ($name:ident, $ty:ty, $read:ident) => {
        #[doc = concat!("Reads a `", stringify!($ty), "` in the reader's byte order.")]
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.take(size_of::<$ty>())?;
            Ok(match self.endian {
                Endian::Big => BigEndian::$read(bytes),
                Endian::Little => LittleEndian::$read(bytes),
            })
        }
    };
}

/// Growable byte buffer writer.
#[derive(Debug, Default, Clone)]
pub struct ByteBuilder {
    buffer: Vec<u8>,
    endian: Endian,
}

impl ByteBuilder {
    /// Creates an empty big-endian builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty builder with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            endian: Endian::Big,
        }
    }

    /// Switches the byte order used by subsequent writes.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Extends the buffer by `count` zeroed bytes and returns them.
    fn grow(&mut self, count: usize) -> &mut [u8] {
        let start = self.buffer.len();
        self.buffer.resize(start + count, 0);
        &mut self.buffer[start..]
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    /// Appends a single signed byte.
    pub fn put_i8(&mut self, value: i8) -> &mut Self {
        self.buffer.push(value as u8);
        self
    }

    put_impl!(put_u16, u16, write_u16);
    put_impl!(put_i16, i16, write_i16);
    put_impl!(put_u32, u32, write_u32);
    put_impl!(put_i32, i32, write_i32);
    put_impl!(put_u64, u64, write_u64);
    put_impl!(put_i64, i64, write_i64);
    put_impl!(put_f32, f32, write_f32);
    put_impl!(put_f64, f64, write_f64);

    /// Appends raw bytes without a length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Appends a string prefixed with its byte length as `u32`.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.put_u32(value.len() as u32);
        self.put_bytes(value.as_bytes())
    }

    /// Appends a NUL-terminated string.
    pub fn put_cstring(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes());
        self.put_u8(0)
    }

    /// Overwrites a previously written big/little-endian `u32` at `offset`.
    pub fn set_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let available = self.buffer.len().saturating_sub(offset);
        if available < 4 {
            return Err(StorageError::BufferUnderflow {
                needed: 4,
                available,
            });
        }
        let dst = &mut self.buffer[offset..offset + 4];
        match self.endian {
            Endian::Big => BigEndian::write_u32(dst, value),
            Endian::Little => LittleEndian::write_u32(dst, value),
        }
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the builder and returns the encoded bytes.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    endian: Endian,
}

impl<'a> ByteReader<'a> {
    /// Creates a big-endian reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            endian: Endian::Big,
        }
    }

    /// Switches the byte order used by subsequent reads.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if available < count {
            return Err(StorageError::BufferUnderflow {
                needed: count,
                available,
            });
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a single signed byte.
    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    get_impl!(get_u16, u16, read_u16);
    get_impl!(get_i16, i16, read_i16);
    get_impl!(get_u32, u32, read_u32);
    get_impl!(get_i32, i32, read_i32);
    get_impl!(get_u64, u64, read_u64);
    get_impl!(get_i64, i64, read_i64);
    get_impl!(get_f32, f32, read_f32);
    get_impl!(get_f64, f64, read_f64);

    /// Reads exactly `count` raw bytes.
    pub fn get_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String> {
        let length = self.get_u32()? as usize;
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| StorageError::Corrupted(format!("invalid UTF-8 string: {err}")))
    }

    /// Reads a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn get_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.position..];
        let end = rest
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(StorageError::BufferUnderflow {
                needed: rest.len() + 1,
                available: rest.len(),
            })?;
        let bytes = self.take(end)?;
        self.position += 1;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| StorageError::Corrupted(format!("invalid UTF-8 string: {err}")))
    }

    /// Checks that the next bytes equal `magic`, consuming them.
    pub fn check_magic(&mut self, magic: &[u8]) -> Result<bool> {
        Ok(self.take(magic.len())? == magic)
    }

    /// Offset of the next byte to read.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether at least one byte is left.
    pub fn has_next(&self) -> bool {
        self.remaining() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian_by_default() {
        let mut builder = ByteBuilder::new();
        builder.put_u16(0x0102).put_u32(0x03040506);
        assert_eq!(builder.build(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn little_endian_reads_back() {
        let mut builder = ByteBuilder::new().with_endian(Endian::Little);
        builder.put_i64(-42).put_f32(1.5).put_i16(-7);
        let bytes = builder.build();
        assert_eq!(bytes[0], 0xD6);

        let mut reader = ByteReader::new(&bytes).with_endian(Endian::Little);
        assert_eq!(reader.get_i64().unwrap(), -42);
        assert_eq!(reader.get_f32().unwrap(), 1.5);
        assert_eq!(reader.get_i16().unwrap(), -7);
        assert!(!reader.has_next());
    }

    #[test]
    fn floats_use_ieee_layout() {
        let mut builder = ByteBuilder::new();
        builder.put_f32(1.0).put_f64(-2.0);
        let bytes = builder.build();
        assert_eq!(bytes[..4], [0x3F, 0x80, 0, 0]);
        assert_eq!(bytes[4..], [0xC0, 0, 0, 0, 0, 0, 0, 0]);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.get_f32().unwrap(), 1.0);
        assert_eq!(reader.get_f64().unwrap(), -2.0);
    }

    #[test]
    fn strings_and_cstrings() {
        let mut builder = ByteBuilder::new();
        builder.put_string("stone").put_cstring("dirt").put_u8(9);
        let bytes = builder.build();

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.get_string().unwrap(), "stone");
        assert_eq!(reader.get_cstring().unwrap(), "dirt");
        assert_eq!(reader.get_u8().unwrap(), 9);
    }

    #[test]
    fn reading_past_end_underflows() {
        let bytes = [0u8, 1, 2];
        let mut reader = ByteReader::new(&bytes);
        match reader.get_u32() {
            Err(StorageError::BufferUnderflow { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected result {other:?}"),
        }
        // a failed read does not consume anything
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn truncated_string_underflows() {
        let mut builder = ByteBuilder::new();
        builder.put_u32(10).put_bytes(b"abc");
        let bytes = builder.build();
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            reader.get_string(),
            Err(StorageError::BufferUnderflow { .. })
        ));
    }

    #[test]
    fn set_u32_patches_in_place() {
        let mut builder = ByteBuilder::new();
        builder.put_u32(0).put_u8(7);
        builder.set_u32(0, 0xAABBCCDD).unwrap();
        assert!(builder.set_u32(2, 1).is_err());
        assert_eq!(builder.build(), vec![0xAA, 0xBB, 0xCC, 0xDD, 7]);
    }
}
