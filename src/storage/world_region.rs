//! # World Region
//!
//! Staged slots of a single region, kept until the layer flushes them.

use super::region_file::ChunkBlob;
use super::REGION_CHUNKS_COUNT;

/// In-memory staging of one region of one layer.
///
/// Holds the compressed blob of every slot that was written or read since
/// the region was loaded. Only written slots mark the region unsaved; slots
/// cached from disk do not.
#[derive(Clone, Debug)]
pub struct WorldRegion {
    chunks: Vec<Option<ChunkBlob>>,
    unsaved: bool,
}

impl Default for WorldRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldRegion {
    /// An empty, saved region.
    pub fn new() -> Self {
        Self {
            chunks: vec![None; REGION_CHUNKS_COUNT],
            unsaved: false,
        }
    }

    /// Blob staged in slot `index`.
    pub fn get(&self, index: usize) -> Option<&ChunkBlob> {
        self.chunks.get(index).and_then(Option::as_ref)
    }

    /// Whether slot `index` holds a blob.
    pub fn has_chunk(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Stages a new blob for slot `index` and marks the region unsaved.
    pub fn put(&mut self, index: usize, blob: ChunkBlob) {
        self.chunks[index] = Some(blob);
        self.unsaved = true;
    }

    /// Keeps a blob read from disk without marking the region unsaved.
    pub fn cache(&mut self, index: usize, blob: ChunkBlob) {
        self.chunks[index] = Some(blob);
    }

    /// Whether staged slots are waiting to be written.
    pub fn is_unsaved(&self) -> bool {
        self.unsaved
    }

    /// Marks the region as written or unsaved.
    pub fn set_unsaved(&mut self, unsaved: bool) {
        self.unsaved = unsaved;
    }

    /// All slots in region order, as written to disk.
    pub fn slots(&self) -> &[Option<ChunkBlob>] {
        &self.chunks
    }

    /// Number of occupied slots.
    pub fn chunks_count(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_slots_do_not_dirty_the_region() {
        let mut region = WorldRegion::new();
        region.cache(3, ChunkBlob::new(vec![1], 1));
        assert!(!region.is_unsaved());
        assert!(region.has_chunk(3));

        region.put(4, ChunkBlob::new(vec![2], 1));
        assert!(region.is_unsaved());
        assert_eq!(region.chunks_count(), 2);
        assert_eq!(region.slots().len(), REGION_CHUNKS_COUNT);
    }
}
