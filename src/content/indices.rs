//! # Indices Document
//!
//! The `indices.json` file of a world: the content load order the world was
//! saved with, the region format version of its files, and the custom field
//! layout of every block that had one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::struct_layout::StructLayout;
use super::Content;
use crate::error::Result;

/// File name of the indices document inside a world directory.
pub const INDICES_FILE: &str = "indices.json";

/// Worlds written before the version was recorded used this format.
fn legacy_region_version() -> u32 {
    2
}

/// Content names and layouts a world was saved with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndicesDocument {
    /// Region format the world's files were written in.
    #[serde(rename = "region-version", default = "legacy_region_version")]
    pub region_version: u32,
    /// Block names in stored id order.
    #[serde(default)]
    pub blocks: Vec<String>,
    /// Item names in stored id order.
    #[serde(default)]
    pub items: Vec<String>,
    /// Field layouts of blocks that carry custom data.
    #[serde(rename = "blocks-data", default)]
    pub blocks_data: BTreeMap<String, StructLayout>,
}

impl IndicesDocument {
    /// Snapshot of the live content as it would be saved now.
    pub fn from_content(content: &Content, region_version: u32) -> Self {
        let blocks_data = content
            .blocks
            .iter()
            .filter_map(|def| def.fields.clone().map(|fields| (def.name.clone(), fields)))
            .collect();
        Self {
            region_version,
            blocks: content.blocks.names(),
            items: content.items.names(),
            blocks_data,
        }
    }

    /// Location of the document inside `world_dir`.
    pub fn path(world_dir: &Path) -> PathBuf {
        world_dir.join(INDICES_FILE)
    }

    /// Reads the document of `world_dir`, `None` if the world has none yet.
    pub fn load(world_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(world_dir);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Writes the document as pretty-printed JSON.
    pub fn save(&self, world_dir: &Path) -> Result<()> {
        fs::create_dir_all(world_dir)?;
        let text = serde_json::to_string_pretty(self)?;
        fs::write(Self::path(world_dir), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::struct_layout::{FieldDescriptor, FieldType};
    use crate::content::{BlockDef, ItemDef};

    #[test]
    fn document_uses_hyphenated_keys() {
        let layout =
            StructLayout::create(vec![FieldDescriptor::new(FieldType::I16, "charge", 1)]).unwrap();
        let content = Content::new(
            vec![
                BlockDef::new("core:air"),
                BlockDef::new("mod:battery").with_fields(layout.clone()),
            ],
            vec![ItemDef::new("core:empty")],
        );
        let document = IndicesDocument::from_content(&content, 3);
        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(value["region-version"], 3);
        assert_eq!(value["blocks"][1], "mod:battery");
        assert_eq!(value["blocks-data"]["mod:battery"][0]["name"], "charge");

        let dir = tempfile::tempdir().unwrap();
        assert!(IndicesDocument::load(dir.path()).unwrap().is_none());
        document.save(dir.path()).unwrap();
        let loaded = IndicesDocument::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, document);
        assert_eq!(loaded.blocks_data["mod:battery"], layout);
    }

    #[test]
    fn oversized_layout_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"blocks": ["core:air"], "items": [], "blocks-data": {
            "mod:battery": [{"type": "int64", "name": "charge", "elements": 18446744073709551615}]
        }}"#;
        fs::write(IndicesDocument::path(dir.path()), json).unwrap();
        assert!(matches!(
            IndicesDocument::load(dir.path()),
            Err(crate::error::StorageError::Json(_))
        ));
    }

    #[test]
    fn missing_version_means_legacy_format() {
        let document: IndicesDocument =
            serde_json::from_str(r#"{"blocks": ["core:air"], "items": []}"#).unwrap();
        assert_eq!(document.region_version, 2);
        assert!(document.blocks_data.is_empty());
    }
}
