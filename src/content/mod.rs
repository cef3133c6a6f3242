//! # Content Module
//!
//! Live content definitions (blocks and items) as loaded for the current
//! session, plus everything needed to compare them against what a world was
//! saved with.
//!
//! ## Key Components
//!
//! * `Content` - the block and item definitions in current load order
//! * `struct_layout` - typed records for per-block custom fields
//! * `indices` - the persisted indices document of a world
//! * `content_report` - the diff between a world's indices and live content

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use struct_layout::StructLayout;

pub mod content_report;
pub mod indices;
pub mod struct_layout;

/// Runtime id of a block type, as stored in voxel arrays.
pub type BlockId = u16;
/// Runtime id of an item type, as stored in inventories.
pub type ItemId = u32;

/// Marks a block index that has no current definition.
pub const BLOCK_VOID: BlockId = BlockId::MAX;
/// Marks an item index that has no current definition.
pub const ITEM_VOID: ItemId = ItemId::MAX;

/// Kind of content unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// A block definition.
    Block,
    /// An item definition.
    Item,
}

/// Anything that can be resolved by its namespaced name (`"pack:name"`).
pub trait ContentUnit {
    /// Namespaced name of the unit.
    fn name(&self) -> &str;
}

/// Definition of a block type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockDef {
    /// Namespaced name, such as `core:air`.
    pub name: String,
    /// Layout of the per-block custom fields, if the block carries any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<StructLayout>,
}

impl BlockDef {
    /// A block without custom fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: None,
        }
    }

    /// Attaches a custom field layout.
    pub fn with_fields(mut self, fields: StructLayout) -> Self {
        self.fields = Some(fields);
        self
    }
}

impl ContentUnit for BlockDef {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Definition of an item type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemDef {
    /// Namespaced name, such as `core:empty`.
    pub name: String,
}

impl ItemDef {
    /// An item definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ContentUnit for ItemDef {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Content units of one kind, indexed by runtime id (position in load order).
#[derive(Clone, Debug)]
pub struct ContentUnitDefs<T> {
    defs: Vec<T>,
    ids: HashMap<String, usize>,
}

impl<T: ContentUnit> ContentUnitDefs<T> {
    /// Indexes `defs` by name. A repeated name resolves to its first
    /// definition.
    pub fn new(defs: Vec<T>) -> Self {
        let mut ids = HashMap::with_capacity(defs.len());
        for (id, def) in defs.iter().enumerate() {
            if ids.contains_key(def.name()) {
                warn!("Content unit '{}' is defined more than once", def.name());
                continue;
            }
            ids.insert(def.name().to_string(), id);
        }
        Self { defs, ids }
    }

    /// Names whose definition shadows an earlier one, in load order.
    pub fn duplicates(&self) -> Vec<&str> {
        self.defs
            .iter()
            .enumerate()
            .filter(|(id, def)| self.ids.get(def.name()) != Some(id))
            .map(|(_, def)| def.name())
            .collect()
    }

    /// Returns the runtime id of the unit named `name`.
    pub fn find_id(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    /// Definition named `name`.
    pub fn find(&self, name: &str) -> Option<&T> {
        self.find_id(name).map(|id| &self.defs[id])
    }

    /// Definition with runtime id `id`.
    pub fn get(&self, id: usize) -> Option<&T> {
        self.defs.get(id)
    }

    /// Number of definitions.
    pub fn count(&self) -> usize {
        self.defs.len()
    }

    /// Definitions in runtime id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.defs.iter()
    }

    /// Names in runtime id order, the form persisted in the indices document.
    pub fn names(&self) -> Vec<String> {
        self.defs.iter().map(|def| def.name().to_string()).collect()
    }
}

#[derive(Deserialize)]
struct ContentFile {
    #[serde(default)]
    blocks: Vec<BlockDef>,
    #[serde(default)]
    items: Vec<ItemDef>,
}

/// The block and item definitions of the current session.
#[derive(Clone, Debug)]
pub struct Content {
    /// Block definitions.
    pub blocks: ContentUnitDefs<BlockDef>,
    /// Item definitions.
    pub items: ContentUnitDefs<ItemDef>,
}

impl Content {
    /// Indexes the given definitions.
    pub fn new(blocks: Vec<BlockDef>, items: Vec<ItemDef>) -> Self {
        Self {
            blocks: ContentUnitDefs::new(blocks),
            items: ContentUnitDefs::new(items),
        }
    }

    /// Loads content definitions from a JSON file of the form
    /// `{"blocks": [{"name": .., "fields": [..]}], "items": [{"name": ..}]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: ContentFile = serde_json::from_str(&text)?;
        let content = Self::new(file.blocks, file.items);
        let duplicates: Vec<&str> = content
            .blocks
            .duplicates()
            .into_iter()
            .chain(content.items.duplicates())
            .collect();
        if !duplicates.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "{path:?} defines {} more than once",
                duplicates.join(", ")
            )));
        }
        Ok(content)
    }
}
