//! # World Regions
//!
//! All stored chunk data of one world: five independent layers behind a
//! typed API. Constructed once per open world and shared by reference
//! (usually behind an `Arc`) with every thread that reads or writes chunks.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::regions_layer::RegionsLayer;
use super::{ChunkPos, RegionKey, RegionLayerId};
use crate::config::StorageSettings;
use crate::error::Result;
use crate::voxels::chunk::{decode_lights, decode_voxels, encode_lights, encode_voxels, Voxel};
use crate::voxels::{BlocksMetadata, ChunkInventories};

/// Every region layer of one world.
pub struct WorldRegions {
    directory: PathBuf,
    layers: Vec<RegionsLayer>,
}

impl WorldRegions {
    /// A store for the world in `directory` with default settings.
    pub fn new(directory: impl Into<PathBuf>, max_open_files: usize) -> Self {
        let directory = directory.into();
        let layers = RegionLayerId::ALL
            .iter()
            .map(|&layer| RegionsLayer::new(&directory, layer, max_open_files))
            .collect();
        Self { directory, layers }
    }

    /// A store for the world in `directory` tuned by `settings`.
    pub fn with_settings(directory: impl Into<PathBuf>, settings: &StorageSettings) -> Self {
        Self::new(directory, settings.max_open_files)
    }

    /// World directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Store of one layer.
    pub fn layer(&self, layer: RegionLayerId) -> &RegionsLayer {
        &self.layers[layer as usize]
    }

    /// Stores a chunk's voxels.
    pub fn put_voxels(&self, pos: ChunkPos, voxels: &[Voxel]) -> Result<()> {
        self.layer(RegionLayerId::Voxels)
            .put(pos, &encode_voxels(voxels)?)
    }

    /// Reads a chunk's voxels.
    pub fn get_voxels(&self, pos: ChunkPos) -> Result<Option<Vec<Voxel>>> {
        self.layer(RegionLayerId::Voxels)
            .get_data(pos)?
            .map(|data| decode_voxels(&data))
            .transpose()
    }

    /// Stores a chunk's light levels.
    pub fn put_lights(&self, pos: ChunkPos, lights: &[u16]) -> Result<()> {
        self.layer(RegionLayerId::Lights)
            .put(pos, &encode_lights(lights)?)
    }

    /// Reads a chunk's light levels.
    pub fn get_lights(&self, pos: ChunkPos) -> Result<Option<Vec<u16>>> {
        self.layer(RegionLayerId::Lights)
            .get_data(pos)?
            .map(|data| decode_lights(&data))
            .transpose()
    }

    /// Stores a chunk's inventories.
    pub fn put_inventories(&self, pos: ChunkPos, inventories: &ChunkInventories) -> Result<()> {
        self.layer(RegionLayerId::Inventories)
            .put(pos, &inventories.encode())
    }

    /// Reads a chunk's inventories.
    pub fn get_inventories(&self, pos: ChunkPos) -> Result<Option<ChunkInventories>> {
        self.layer(RegionLayerId::Inventories)
            .get_data(pos)?
            .map(|data| ChunkInventories::decode(&data))
            .transpose()
    }

    /// Stores the entity snapshots of a chunk as JSON.
    pub fn put_entities(&self, pos: ChunkPos, entities: &Value) -> Result<()> {
        self.layer(RegionLayerId::Entities)
            .put(pos, &serde_json::to_vec(entities)?)
    }

    /// Reads a chunk's entity snapshots.
    pub fn get_entities(&self, pos: ChunkPos) -> Result<Option<Value>> {
        match self.layer(RegionLayerId::Entities).get_data(pos)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Stores a chunk's block metadata.
    pub fn put_blocks_data(&self, pos: ChunkPos, metadata: &BlocksMetadata) -> Result<()> {
        self.layer(RegionLayerId::BlocksData)
            .put(pos, &metadata.encode())
    }

    /// Reads a chunk's block metadata.
    pub fn get_blocks_data(&self, pos: ChunkPos) -> Result<Option<BlocksMetadata>> {
        self.layer(RegionLayerId::BlocksData)
            .get_data(pos)?
            .map(|data| BlocksMetadata::decode(&data))
            .transpose()
    }

    /// Maps raw chunk payloads of one region of `layer`.
    /// See [`RegionsLayer::process_region`].
    pub fn process_region<F>(&self, key: RegionKey, layer: RegionLayerId, transform: F) -> Result<usize>
    where
        F: FnMut(ChunkPos, Vec<u8>) -> Result<Option<Vec<u8>>>,
    {
        self.layer(layer).process_region(key, transform)
    }

    /// Runs `update` over the decoded inventories of every chunk of a
    /// region. Chunks for which it returns `true` are re-encoded and staged.
    pub fn process_inventories<F>(&self, key: RegionKey, mut update: F) -> Result<usize>
    where
        F: FnMut(ChunkPos, &mut ChunkInventories) -> Result<bool>,
    {
        self.process_region(key, RegionLayerId::Inventories, |pos, data| {
            let mut inventories = ChunkInventories::decode(&data)?;
            Ok(update(pos, &mut inventories)?.then(|| inventories.encode()))
        })
    }

    /// Runs `update` over the decoded block metadata heap of every chunk of
    /// a region. Chunks for which it returns `true` are re-encoded and staged.
    pub fn process_blocks_data<F>(&self, key: RegionKey, mut update: F) -> Result<usize>
    where
        F: FnMut(ChunkPos, &mut BlocksMetadata) -> Result<bool>,
    {
        self.process_region(key, RegionLayerId::BlocksData, |pos, data| {
            let mut heap = BlocksMetadata::decode(&data)?;
            Ok(update(pos, &mut heap)?.then(|| heap.encode()))
        })
    }

    /// Regions with a file in `layer`.
    pub fn list_regions(&self, layer: RegionLayerId) -> Result<Vec<RegionKey>> {
        self.layer(layer).list_regions()
    }

    /// Format version of a region file, `None` if it does not exist.
    pub fn region_file_version(&self, layer: RegionLayerId, key: RegionKey) -> Result<Option<u32>> {
        self.layer(layer).region_file_version(key)
    }

    /// Flushes every layer.
    pub fn write_all(&self) -> Result<()> {
        for layer in &self.layers {
            layer.write_all()?;
        }
        Ok(())
    }

    /// Drops every clean region of every layer from memory.
    pub fn unload_saved(&self) -> usize {
        self.layers.iter().map(|layer| layer.unload_saved()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxels::{Inventory, ItemStack, CHUNK_VOL};

    #[test]
    fn each_layer_lives_in_its_own_folder() {
        let dir = tempfile::tempdir().unwrap();
        let regions = WorldRegions::new(dir.path(), 4);
        let pos = ChunkPos::new(0, 0);

        regions
            .put_voxels(pos, &vec![Voxel::new(1, 0); CHUNK_VOL])
            .unwrap();
        regions.put_lights(pos, &vec![15; CHUNK_VOL]).unwrap();
        regions
            .put_entities(pos, &serde_json::json!([{"id": "pig"}]))
            .unwrap();
        regions.write_all().unwrap();

        for folder in ["regions", "lights", "entities"] {
            assert!(dir.path().join(folder).join("0_0.bin").exists(), "{folder}");
        }
        assert!(!dir.path().join("inventories").exists());
        assert!(!dir.path().join("blocksdata").exists());
    }

    #[test]
    fn process_inventories_restages_changed_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let regions = WorldRegions::new(dir.path(), 4);
        let mut inventories = ChunkInventories::new();
        inventories
            .insert(10, Inventory::new(vec![ItemStack::new(1, 2)]))
            .unwrap();
        regions
            .put_inventories(ChunkPos::new(2, 2), &inventories)
            .unwrap();

        let changed = regions
            .process_inventories(RegionKey::new(0, 0), |_, inventories| {
                inventories.remap_items(|item| item + 4);
                Ok(true)
            })
            .unwrap();
        assert_eq!(changed, 1);

        let stored = regions
            .get_inventories(ChunkPos::new(2, 2))
            .unwrap()
            .unwrap();
        assert_eq!(stored.get(10).unwrap().slots[0], ItemStack::new(5, 2));
    }

    #[test]
    fn unloading_keeps_unsaved_regions() {
        let dir = tempfile::tempdir().unwrap();
        let regions = WorldRegions::new(dir.path(), 4);
        let pos = ChunkPos::new(1, 1);
        regions.put_lights(pos, &vec![3; CHUNK_VOL]).unwrap();
        regions.write_all().unwrap();

        assert!(regions.get_lights(pos).unwrap().is_some());
        regions
            .put_voxels(pos, &vec![Voxel::new(2, 0); CHUNK_VOL])
            .unwrap();
        assert_eq!(regions.unload_saved(), 1);
        assert_eq!(
            regions.get_voxels(pos).unwrap().unwrap()[0],
            Voxel::new(2, 0)
        );
        assert_eq!(regions.get_lights(pos).unwrap(), Some(vec![3; CHUNK_VOL]));
    }
}
