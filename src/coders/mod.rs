//! # Coders Module
//!
//! Leaf binary codecs shared by the storage layers:
//!
//! * `byte_codec` - fixed-width integers, floats and strings with selectable endianness
//! * `rle` - plain and extended run-length codecs
//! * `compression` - the per-layer [`compression::Method`] dispatch

pub mod byte_codec;
pub mod compression;
pub mod rle;

pub use byte_codec::{ByteBuilder, ByteReader, Endian};
pub use compression::Method;
