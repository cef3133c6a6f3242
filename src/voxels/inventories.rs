//! Block inventories of one chunk, keyed by the in-chunk voxel index of the
//! block that owns them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coders::{ByteBuilder, ByteReader};
use crate::content::ItemId;
use crate::error::{Result, StorageError};

use super::chunk::CHUNK_VOL;

/// A stack of identical items in one inventory slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item id.
    pub item: ItemId,
    /// Stack size.
    pub count: u32,
}

impl ItemStack {
    /// A stack of `count` items.
    pub fn new(item: ItemId, count: u32) -> Self {
        Self { item, count }
    }
}

/// Slots of one container block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Slots in order.
    pub slots: Vec<ItemStack>,
}

impl Inventory {
    /// An inventory holding `slots`.
    pub fn new(slots: Vec<ItemStack>) -> Self {
        Self { slots }
    }

    /// Rewrites every item id through `remap`.
    pub fn remap_items(&mut self, remap: impl Fn(ItemId) -> ItemId) {
        for stack in &mut self.slots {
            stack.item = remap(stack.item);
        }
    }
}

/// Inventories of one chunk keyed by voxel index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkInventories {
    inventories: BTreeMap<u32, Inventory>,
}

impl ChunkInventories {
    /// No inventories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the inventory of the voxel at `index`.
    pub fn insert(&mut self, index: u32, inventory: Inventory) -> Result<()> {
        if index as usize >= CHUNK_VOL {
            return Err(StorageError::InvalidInput(format!(
                "inventory voxel index {index} is outside the chunk"
            )));
        }
        self.inventories.insert(index, inventory);
        Ok(())
    }

    /// Inventory of the voxel at `index`.
    pub fn get(&self, index: u32) -> Option<&Inventory> {
        self.inventories.get(&index)
    }

    /// Number of inventories.
    pub fn len(&self) -> usize {
        self.inventories.len()
    }

    /// Whether the chunk has no inventories.
    pub fn is_empty(&self) -> bool {
        self.inventories.is_empty()
    }

    /// Inventories in voxel index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Inventory)> {
        self.inventories.iter().map(|(&index, inventory)| (index, inventory))
    }

    /// Rewrites every item id through `remap`.
    pub fn remap_items(&mut self, remap: impl Fn(ItemId) -> ItemId) {
        for inventory in self.inventories.values_mut() {
            inventory.remap_items(&remap);
        }
    }

    /// Serializes the inventories.
    pub fn encode(&self) -> Vec<u8> {
        let mut builder = ByteBuilder::new();
        builder.put_u32(self.inventories.len() as u32);
        for (&index, inventory) in &self.inventories {
            builder.put_u32(index).put_u32(inventory.slots.len() as u32);
            for stack in &inventory.slots {
                builder.put_u32(stack.item).put_u32(stack.count);
            }
        }
        builder.build()
    }

    /// Parses serialized inventories.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let count = reader.get_u32()?;
        let mut inventories = Self::new();
        for _ in 0..count {
            let index = reader.get_u32()?;
            let slots_count = reader.get_u32()? as usize;
            // every slot needs 8 bytes, so a bogus count fails before allocating
            if slots_count > reader.remaining() / 8 {
                return Err(StorageError::BufferUnderflow {
                    needed: slots_count * 8,
                    available: reader.remaining(),
                });
            }
            let mut slots = Vec::with_capacity(slots_count);
            for _ in 0..slots_count {
                let item = reader.get_u32()?;
                let count = reader.get_u32()?;
                slots.push(ItemStack::new(item, count));
            }
            inventories.insert(index, Inventory::new(slots))?;
        }
        Ok(inventories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_big_endian_and_ordered() {
        let mut inventories = ChunkInventories::new();
        inventories
            .insert(300, Inventory::new(vec![ItemStack::new(2, 5)]))
            .unwrap();
        inventories.insert(7, Inventory::new(vec![])).unwrap();

        let data = inventories.encode();
        assert_eq!(&data[0..4], &[0, 0, 0, 2]);
        // lowest voxel index first
        assert_eq!(&data[4..8], &[0, 0, 0, 7]);
        assert_eq!(ChunkInventories::decode(&data).unwrap(), inventories);
    }

    #[test]
    fn remap_touches_every_slot() {
        let mut inventories = ChunkInventories::new();
        inventories
            .insert(
                1,
                Inventory::new(vec![ItemStack::new(1, 3), ItemStack::new(2, 1)]),
            )
            .unwrap();
        inventories.remap_items(|item| item * 10);
        let slots = &inventories.get(1).unwrap().slots;
        assert_eq!(slots[0], ItemStack::new(10, 3));
        assert_eq!(slots[1], ItemStack::new(20, 1));
    }

    #[test]
    fn truncated_payload_fails() {
        let mut builder = ByteBuilder::new();
        builder.put_u32(1).put_u32(0).put_u32(1000);
        let result = ChunkInventories::decode(&builder.build());
        assert!(matches!(result, Err(StorageError::BufferUnderflow { .. })));
    }

    #[test]
    fn index_outside_chunk_is_rejected() {
        let mut inventories = ChunkInventories::new();
        assert!(inventories
            .insert(CHUNK_VOL as u32, Inventory::default())
            .is_err());
    }
}
