//! # Block Metadata Heap
//!
//! Sparse per-chunk storage for the custom fields of blocks. Each entry is
//! one record shaped by the owning block's `StructLayout`, keyed by the
//! in-chunk voxel index of that block. The heap itself does not know the
//! layouts; it only stores the raw records.

use std::collections::BTreeMap;

use crate::coders::{ByteBuilder, ByteReader};
use crate::error::{Result, StorageError};

use super::chunk::CHUNK_VOL;

/// Per-voxel custom block records of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlocksMetadata {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl BlocksMetadata {
    /// An empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` as the record of the block at `index`.
    pub fn set(&mut self, index: u32, data: Vec<u8>) -> Result<()> {
        if index as usize >= CHUNK_VOL {
            return Err(StorageError::InvalidInput(format!(
                "block metadata index {index} is outside the chunk"
            )));
        }
        if data.len() > u16::MAX as usize {
            return Err(StorageError::InvalidInput(format!(
                "block metadata record of {} bytes is too large",
                data.len()
            )));
        }
        self.entries.insert(index, data);
        Ok(())
    }

    /// Record of the voxel at `index`.
    pub fn get(&self, index: u32) -> Option<&[u8]> {
        self.entries.get(&index).map(Vec::as_slice)
    }

    /// Removes the record of the voxel at `index`.
    pub fn remove(&mut self, index: u32) -> Option<Vec<u8>> {
        self.entries.remove(&index)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in voxel index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.entries
            .iter()
            .map(|(&index, data)| (index, data.as_slice()))
    }

    /// Serializes the heap.
    pub fn encode(&self) -> Vec<u8> {
        let mut builder = ByteBuilder::new();
        builder.put_u32(self.entries.len() as u32);
        for (&index, data) in &self.entries {
            builder
                .put_u32(index)
                .put_u16(data.len() as u16)
                .put_bytes(data);
        }
        builder.build()
    }

    /// Parses a serialized heap.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let count = reader.get_u32()?;
        let mut heap = Self::new();
        for _ in 0..count {
            let index = reader.get_u32()?;
            let size = reader.get_u16()? as usize;
            let record = reader.get_bytes(size)?;
            heap.set(index, record.to_vec())?;
        }
        Ok(heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_encoding() {
        let mut heap = BlocksMetadata::new();
        heap.set(42, vec![0xF4, 0x01]).unwrap();
        heap.set(3, vec![]).unwrap();

        let data = heap.encode();
        assert_eq!(
            data,
            vec![
                0, 0, 0, 2, // count
                0, 0, 0, 3, 0, 0, // empty record at 3
                0, 0, 0, 42, 0, 2, 0xF4, 0x01,
            ]
        );
        let decoded = BlocksMetadata::decode(&data).unwrap();
        assert_eq!(decoded.get(42), Some(&[0xF4, 0x01][..]));
        assert_eq!(decoded, heap);
    }

    #[test]
    fn record_running_past_the_end_fails() {
        let data = [0, 0, 0, 1, 0, 0, 0, 3, 0, 9, 1, 2];
        assert!(matches!(
            BlocksMetadata::decode(&data),
            Err(StorageError::BufferUnderflow { .. })
        ));
    }

    #[test]
    fn remove_drops_entry() {
        let mut heap = BlocksMetadata::new();
        heap.set(1, vec![1]).unwrap();
        assert_eq!(heap.remove(1), Some(vec![1]));
        assert!(heap.is_empty());
    }
}
