//! # Regions Layer
//!
//! Storage of one kind of chunk data. A layer owns its folder, its
//! compression policy, the map of regions staged in memory and the pool of
//! its open region files.
//!
//! ## Locking
//!
//! The region map mutex only guards short lookups and updates. It is never
//! held while waiting on the file pool or doing file I/O, so a thread
//! blocked on a full pool does not stall reads and writes of other regions.
//! A region is flushed under a pool reservation, which keeps readers from
//! opening the file while it is rewritten.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};

use super::file_pool::{RegionFilePool, RegionWriteGuard};
use super::region_file::{ChunkBlob, RegionFile};
use super::world_region::WorldRegion;
use super::{ChunkPos, RegionKey, RegionLayerId};
use crate::coders::compression::{compress, decompress};
use crate::coders::Method;
use crate::error::Result;

/// Staged regions and open files of one layer.
pub struct RegionsLayer {
    layer: RegionLayerId,
    folder: PathBuf,
    compression: Method,
    regions: Mutex<HashMap<RegionKey, WorldRegion>>,
    files: RegionFilePool,
}

impl RegionsLayer {
    /// A layer stored under its folder in `world_dir`.
    pub fn new(world_dir: &Path, layer: RegionLayerId, max_open_files: usize) -> Self {
        let folder = world_dir.join(layer.folder());
        Self {
            layer,
            compression: layer.compression(),
            files: RegionFilePool::new(folder.clone(), max_open_files),
            folder,
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Layer this store holds.
    pub fn layer(&self) -> RegionLayerId {
        self.layer
    }

    /// Folder holding the layer's region files.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Compression used for new region files.
    pub fn compression(&self) -> Method {
        self.compression
    }

    /// Open file pool of the layer.
    pub fn files(&self) -> &RegionFilePool {
        &self.files
    }

    /// Compresses `data` and stages it as the chunk at `pos`. No disk I/O.
    pub fn put(&self, pos: ChunkPos, data: &[u8]) -> Result<()> {
        let blob = ChunkBlob::new(compress(data, self.compression)?, data.len());
        self.regions
            .lock()
            .unwrap()
            .entry(pos.region())
            .or_default()
            .put(pos.local_index(), blob);
        Ok(())
    }

    /// Returns the decompressed chunk at `pos`, staged data first.
    ///
    /// A blob read from disk is kept in memory, so later reads of the same
    /// chunk are served without touching the file again.
    pub fn get_data(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>> {
        let Some(blob) = self.get_blob(pos.region(), pos.local_index())? else {
            return Ok(None);
        };
        Ok(Some(decompress(
            &blob.data,
            blob.source_len,
            self.compression,
        )?))
    }

    fn get_blob(&self, key: RegionKey, index: usize) -> Result<Option<ChunkBlob>> {
        if let Some(blob) = self.staged_blob(key, index) {
            return Ok(Some(blob));
        }
        let blob = {
            let Some(mut file) = self.files.acquire(key)? else {
                return Ok(None);
            };
            let Some(blob) = file.read(index)? else {
                return Ok(None);
            };
            let method = file.compression();
            drop(file);
            self.recompress(blob, method)?
        };

        let mut regions = self.regions.lock().unwrap();
        let region = regions.entry(key).or_default();
        // a put that raced the read is newer than the file
        if let Some(staged) = region.get(index) {
            return Ok(Some(staged.clone()));
        }
        region.cache(index, blob.clone());
        Ok(Some(blob))
    }

    fn staged_blob(&self, key: RegionKey, index: usize) -> Option<ChunkBlob> {
        self.regions
            .lock()
            .unwrap()
            .get(&key)
            .and_then(|region| region.get(index))
            .cloned()
    }

    /// Brings a blob read from a file into the layer's compression.
    fn recompress(&self, blob: ChunkBlob, method: Method) -> Result<ChunkBlob> {
        if method == self.compression {
            return Ok(blob);
        }
        let data = decompress(&blob.data, blob.source_len, method)?;
        Ok(ChunkBlob::new(
            compress(&data, self.compression)?,
            data.len(),
        ))
    }

    /// Flushes every unsaved region of the layer to disk.
    pub fn write_all(&self) -> Result<()> {
        let mut keys: Vec<RegionKey> = self
            .regions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, region)| region.is_unsaved())
            .map(|(&key, _)| key)
            .collect();
        keys.sort();
        for key in keys {
            self.write_region(key)?;
        }
        Ok(())
    }

    fn write_region(&self, key: RegionKey) -> Result<()> {
        let mut writer = self.files.reserve(key)?;

        let mut slots = {
            let mut regions = self.regions.lock().unwrap();
            let Some(region) = regions.get_mut(&key).filter(|region| region.is_unsaved()) else {
                return Ok(());
            };
            region.set_unsaved(false);
            region.slots().to_vec()
        };

        let merged = self.merge_file_slots(&mut writer, &mut slots);
        let written = merged.and_then(|()| writer.write(self.compression, &slots));
        drop(writer);
        if let Err(err) = written {
            if let Some(region) = self.regions.lock().unwrap().get_mut(&key) {
                region.set_unsaved(true);
            }
            return Err(err);
        }
        debug!("Saved {} region {}", self.layer, key);

        // Saved regions are dropped from memory; the file now holds them.
        let mut regions = self.regions.lock().unwrap();
        if regions.get(&key).is_some_and(|region| !region.is_unsaved()) {
            regions.remove(&key);
        }
        Ok(())
    }

    /// Fills the empty `slots` with the chunks of the file being replaced,
    /// so untouched chunks survive the rewrite.
    fn merge_file_slots(
        &self,
        writer: &mut RegionWriteGuard<'_>,
        slots: &mut [Option<ChunkBlob>],
    ) -> Result<()> {
        let Some(file) = writer.current() else {
            return Ok(());
        };
        let method = file.compression();
        let missing: Vec<usize> = file
            .occupied_slots()
            .filter(|&index| slots[index].is_none())
            .collect();
        for index in missing {
            if let Some(blob) = file.read(index)? {
                slots[index] = Some(self.recompress(blob, method)?);
            }
        }
        Ok(())
    }

    /// Drops every region without unflushed changes from memory, including
    /// chunks cached by reads. Returns how many regions were dropped.
    pub fn unload_saved(&self) -> usize {
        let mut regions = self.regions.lock().unwrap();
        let before = regions.len();
        regions.retain(|_, region| region.is_unsaved());
        before - regions.len()
    }

    /// Number of regions currently held in memory.
    pub fn loaded_count(&self) -> usize {
        self.regions.lock().unwrap().len()
    }

    /// Runs `transform` over every occupied chunk of the region `key`.
    ///
    /// The callback receives the decompressed chunk; returning `Some` stages
    /// the new payload and marks the region unsaved. `None` keeps the chunk.
    ///
    /// # Returns
    /// The number of chunks that were replaced.
    pub fn process_region<F>(&self, key: RegionKey, mut transform: F) -> Result<usize>
    where
        F: FnMut(ChunkPos, Vec<u8>) -> Result<Option<Vec<u8>>>,
    {
        let mut blobs: Vec<(usize, ChunkBlob)> = {
            let regions = self.regions.lock().unwrap();
            regions
                .get(&key)
                .map(|region| {
                    region
                        .slots()
                        .iter()
                        .enumerate()
                        .filter_map(|(index, slot)| slot.clone().map(|blob| (index, blob)))
                        .collect()
                })
                .unwrap_or_default()
        };

        if let Some(mut file) = self.files.acquire(key)? {
            let missing: Vec<usize> = file
                .occupied_slots()
                .filter(|index| !blobs.iter().any(|(staged, _)| staged == index))
                .collect();
            let method = file.compression();
            for index in missing {
                if let Some(blob) = file.read(index)? {
                    blobs.push((index, self.recompress(blob, method)?));
                }
            }
        }
        blobs.sort_by_key(|(index, _)| *index);

        let mut replaced = 0;
        for (index, blob) in blobs {
            let data = decompress(&blob.data, blob.source_len, self.compression)?;
            if let Some(data) = transform(key.chunk(index), data)? {
                self.put(key.chunk(index), &data)?;
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    /// Rewrites every chunk of an outdated region file into the current
    /// format. `transcode` gets the file's version and each decompressed
    /// payload. Returns `false` when the file is missing or already current.
    ///
    /// Chunks already staged in memory are newer than the file and are left
    /// alone. The region is marked unsaved even if the file holds no chunks,
    /// so that the next flush restamps it.
    pub fn upgrade_region<F>(&self, key: RegionKey, mut transcode: F) -> Result<bool>
    where
        F: FnMut(u32, Vec<u8>) -> Result<Vec<u8>>,
    {
        let staged: Vec<usize> = {
            let regions = self.regions.lock().unwrap();
            regions
                .get(&key)
                .map(|region| {
                    (0..region.slots().len())
                        .filter(|&index| region.has_chunk(index))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut payloads = Vec::new();
        {
            let Some(mut file) = self.files.acquire(key)? else {
                return Ok(false);
            };
            if !file.is_upgrade_required() {
                return Ok(false);
            }
            let version = file.version();
            let method = file.compression();
            let slots: Vec<usize> = file
                .occupied_slots()
                .filter(|index| !staged.contains(index))
                .collect();
            for index in slots {
                if let Some(blob) = file.read_raw(index)? {
                    let data = decompress(&blob.data, blob.source_len, method)?;
                    payloads.push((index, transcode(version, data)?));
                }
            }
            info!(
                "Upgrading {} region {} from version {} ({} chunks)",
                self.layer,
                key,
                version,
                payloads.len()
            );
        }

        let mut staged_blobs = Vec::with_capacity(payloads.len());
        for (index, data) in payloads {
            let blob = ChunkBlob::new(compress(&data, self.compression)?, data.len());
            staged_blobs.push((index, blob));
        }
        let mut regions = self.regions.lock().unwrap();
        let region = regions.entry(key).or_default();
        for (index, blob) in staged_blobs {
            region.put(index, blob);
        }
        region.set_unsaved(true);
        Ok(true)
    }

    /// Keys of all region files of this layer found on disk, sorted.
    pub fn list_regions(&self) -> Result<Vec<RegionKey>> {
        if !self.folder.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.folder)? {
            let entry = entry?;
            if let Some(key) = entry.file_name().to_str().and_then(RegionKey::from_file_name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Header version of the region file of `key`, if it exists.
    pub fn region_file_version(&self, key: RegionKey) -> Result<Option<u32>> {
        let path = self.files.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(RegionFile::peek_version(&path)?))
    }

    /// Whether any region of this layer holds unflushed changes.
    pub fn has_unsaved(&self) -> bool {
        self.regions
            .lock()
            .unwrap()
            .values()
            .any(WorldRegion::is_unsaved)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::storage::REGION_CHUNKS_COUNT;

    fn layer(dir: &Path) -> RegionsLayer {
        RegionsLayer::new(dir, RegionLayerId::Lights, 4)
    }

    #[test]
    fn staged_data_is_served_before_flush() {
        let dir = tempfile::tempdir().unwrap();
        let lights = layer(dir.path());
        let pos = ChunkPos::new(3, -4);
        lights.put(pos, &[5, 5, 5, 6]).unwrap();

        assert_eq!(lights.get_data(pos).unwrap(), Some(vec![5, 5, 5, 6]));
        assert!(lights.list_regions().unwrap().is_empty());
        assert!(lights.has_unsaved());
    }

    #[test]
    fn flush_keeps_chunks_that_were_never_loaded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lights = layer(dir.path());
            lights.put(ChunkPos::new(0, 0), &[1; 8]).unwrap();
            lights.put(ChunkPos::new(1, 0), &[2; 8]).unwrap();
            lights.write_all().unwrap();
            assert!(!lights.has_unsaved());
        }

        let lights = layer(dir.path());
        lights.put(ChunkPos::new(1, 0), &[3; 8]).unwrap();
        lights.write_all().unwrap();

        let reopened = layer(dir.path());
        assert_eq!(reopened.get_data(ChunkPos::new(0, 0)).unwrap(), Some(vec![1; 8]));
        assert_eq!(reopened.get_data(ChunkPos::new(1, 0)).unwrap(), Some(vec![3; 8]));
        assert_eq!(reopened.list_regions().unwrap(), vec![RegionKey::new(0, 0)]);
    }

    #[test]
    fn reading_from_disk_does_not_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let lights = layer(dir.path());
        lights.put(ChunkPos::new(0, 0), &[1; 4]).unwrap();
        lights.write_all().unwrap();

        let reopened = layer(dir.path());
        assert!(reopened.get_data(ChunkPos::new(0, 0)).unwrap().is_some());
        assert!(reopened.get_data(ChunkPos::new(9, 9)).unwrap().is_none());
        assert!(!reopened.has_unsaved());
    }

    #[test]
    fn process_region_replaces_selected_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let lights = layer(dir.path());
        lights.put(ChunkPos::new(0, 0), &[1, 1]).unwrap();
        lights.put(ChunkPos::new(5, 0), &[2, 2]).unwrap();
        lights.write_all().unwrap();

        let reopened = layer(dir.path());
        let mut visited = Vec::new();
        let replaced = reopened
            .process_region(RegionKey::new(0, 0), |pos, data| {
                visited.push(pos);
                Ok((data[0] == 2).then(|| vec![9, 9]))
            })
            .unwrap();

        assert_eq!(replaced, 1);
        assert_eq!(visited, vec![ChunkPos::new(0, 0), ChunkPos::new(5, 0)]);
        assert_eq!(reopened.get_data(ChunkPos::new(5, 0)).unwrap(), Some(vec![9, 9]));
        assert!(reopened.has_unsaved());
    }

    #[test]
    fn upgrade_restamps_legacy_files() {
        let dir = tempfile::tempdir().unwrap();
        let lights = layer(dir.path());
        let mut slots = vec![None; REGION_CHUNKS_COUNT];
        slots[0] = Some(ChunkBlob::new(vec![4, 4], 2));
        let path = lights.files().file_path(RegionKey::new(0, 0));
        RegionFile::write_with_version(&path, 2, Method::None, &slots).unwrap();

        assert!(lights.get_data(ChunkPos::new(0, 0)).is_err());
        let upgraded = lights
            .upgrade_region(RegionKey::new(0, 0), |version, data| {
                assert_eq!(version, 2);
                Ok(data)
            })
            .unwrap();
        assert!(upgraded);
        lights.write_all().unwrap();

        assert_eq!(
            lights.region_file_version(RegionKey::new(0, 0)).unwrap(),
            Some(crate::storage::REGION_FORMAT_VERSION)
        );
        let reopened = layer(dir.path());
        assert_eq!(reopened.get_data(ChunkPos::new(0, 0)).unwrap(), Some(vec![4, 4]));
        assert!(!reopened
            .upgrade_region(RegionKey::new(0, 0), |_, data| Ok(data))
            .unwrap());
    }

    #[test]
    fn flushed_regions_leave_memory() {
        let dir = tempfile::tempdir().unwrap();
        let lights = layer(dir.path());
        lights.put(ChunkPos::new(0, 0), &[1; 4]).unwrap();
        lights.put(ChunkPos::new(40, 0), &[2; 4]).unwrap();
        assert_eq!(lights.loaded_count(), 2);
        lights.write_all().unwrap();
        assert_eq!(lights.loaded_count(), 0);

        assert_eq!(lights.get_data(ChunkPos::new(0, 0)).unwrap(), Some(vec![1; 4]));
        lights.put(ChunkPos::new(40, 0), &[3; 4]).unwrap();
        assert_eq!(lights.loaded_count(), 2);
        assert_eq!(lights.unload_saved(), 1);
        assert!(lights.has_unsaved());
        assert_eq!(lights.get_data(ChunkPos::new(40, 0)).unwrap(), Some(vec![3; 4]));
    }

    #[test]
    fn waiting_for_a_file_does_not_block_other_regions() {
        let dir = tempfile::tempdir().unwrap();
        {
            let writer = layer(dir.path());
            for x in 0..3 {
                writer.put(ChunkPos::new(x * 32, 0), &[x as u8; 8]).unwrap();
            }
            writer.write_all().unwrap();
        }
        let lights = Arc::new(RegionsLayer::new(dir.path(), RegionLayerId::Lights, 2));
        lights.put(ChunkPos::new(500, 500), &[7; 8]).unwrap();
        let first = lights.files().acquire(RegionKey::new(0, 0)).unwrap().unwrap();
        let second = lights.files().acquire(RegionKey::new(1, 0)).unwrap().unwrap();

        let reader = {
            let lights = lights.clone();
            thread::spawn(move || lights.get_data(ChunkPos::new(64, 0)).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        let (done, finished) = mpsc::channel();
        {
            let lights = lights.clone();
            thread::spawn(move || {
                lights.put(ChunkPos::new(-500, 3), &[9; 8]).unwrap();
                let staged = lights.get_data(ChunkPos::new(500, 500)).unwrap();
                done.send(staged).unwrap();
            });
        }
        let staged = finished.recv_timeout(Duration::from_secs(5));
        assert_eq!(staged, Ok(Some(vec![7; 8])));

        drop(first);
        drop(second);
        assert_eq!(reader.join().unwrap(), Some(vec![2; 8]));
    }

    #[test]
    fn readers_never_see_a_region_mid_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let lights = Arc::new(RegionsLayer::new(dir.path(), RegionLayerId::Lights, 2));
        for x in 0..8 {
            lights.put(ChunkPos::new(x, 0), &[x as u8; 64]).unwrap();
        }
        lights.write_all().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lights = lights.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let x = round % 8;
                        let data = lights.get_data(ChunkPos::new(x, 0)).unwrap();
                        assert_eq!(data, Some(vec![x as u8; 64]));
                    }
                })
            })
            .collect();
        for round in 0..20u8 {
            lights.put(ChunkPos::new(20, 5), &[round; 64]).unwrap();
            lights.write_all().unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(lights.get_data(ChunkPos::new(20, 5)).unwrap(), Some(vec![19; 64]));
    }
}
