//! # Content Report
//!
//! Differences between the content a world was saved with (its indices
//! document) and the content loaded now. The report is built once when a
//! world is opened and is the only input of a migration run.
//!
//! Three kinds of drift are detected:
//! * **reorder** - every stored name still resolves, but to a different id;
//!   fixable by remapping ids in the stored data
//! * **missing content** - a stored name no longer resolves; not fixable,
//!   reported back to the caller as a list of [`ContentIssue`]s
//! * **layout updates** - a block's custom field layout changed; fixable by
//!   converting every stored record, possibly with recorded data loss

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use num_traits::{NumCast, PrimInt};

use super::indices::IndicesDocument;
use super::struct_layout::{FieldIncompatibility, FieldIncompatibilityType, StructLayout};
use super::{BlockId, Content, ContentType, ContentUnit, ContentUnitDefs, ItemId};
use super::{BLOCK_VOID, ITEM_VOID};
use crate::error::Result;
use crate::storage::REGION_FORMAT_VERSION;

/// Something the caller should know about before a world is converted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentIssue {
    /// A stored content unit has no current definition.
    Missing {
        /// Block or item.
        content_type: ContentType,
        /// Stored name.
        name: String,
    },
    /// Region files must be upgraded to the current format.
    RegionFormatUpdate {
        /// Stored format version.
        from: u32,
        /// Current format version.
        to: u32,
    },
    /// A block's custom field layout changed.
    BlockDataLayoutUpdate {
        /// Block whose layout changed.
        block: String,
    },
}

/// One field of one block that will lose data when converted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLossEntry {
    /// Block that owns the field.
    pub block: String,
    /// Field name in the stored layout.
    pub field: String,
    /// Why the value cannot be carried over.
    pub kind: FieldIncompatibilityType,
}

/// Stored (old) and live (new) field layouts of a block.
#[derive(Clone, Debug)]
pub struct LayoutChange {
    /// Layout recorded in the indices document.
    pub old: StructLayout,
    /// `None` when the block no longer carries custom fields at all.
    pub new: Option<StructLayout>,
}

/// Lookup table from stored index to current runtime id.
#[derive(Clone, Debug)]
pub struct ContentUnitLut<I> {
    content_type: ContentType,
    indices: Vec<I>,
    names: Vec<String>,
    missing_value: I,
    missing_content: bool,
    reorder: bool,
}

impl<I: PrimInt> ContentUnitLut<I> {
    /// Resolves every stored name against the live definitions.
    ///
    /// # Arguments
    /// * `stored_names` - names in the order the world was saved with
    /// * `defs` - live definitions in current load order
    /// * `missing_value` - id recorded for names that do not resolve
    pub fn new<T: ContentUnit>(
        content_type: ContentType,
        stored_names: &[String],
        defs: &ContentUnitDefs<T>,
        missing_value: I,
    ) -> Self {
        let mut lut = Self {
            content_type,
            indices: Vec::with_capacity(stored_names.len()),
            names: stored_names.to_vec(),
            missing_value,
            missing_content: false,
            reorder: false,
        };
        for (index, name) in stored_names.iter().enumerate() {
            match defs.find_id(name).and_then(|id| <I as NumCast>::from(id)) {
                Some(id) => {
                    if id.to_usize() != Some(index) {
                        lut.reorder = true;
                    }
                    lut.indices.push(id);
                }
                None => {
                    lut.missing_content = true;
                    lut.indices.push(missing_value);
                }
            }
        }
        lut
    }

    /// Current id of the unit stored at `index`; the missing value when the
    /// index is unknown or unresolved.
    pub fn get_id(&self, index: I) -> I {
        index
            .to_usize()
            .and_then(|index| self.indices.get(index).copied())
            .unwrap_or(self.missing_value)
    }

    /// Stored name at `index`.
    pub fn get_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Number of stored units.
    pub fn count(&self) -> usize {
        self.indices.len()
    }

    /// Whether any stored index maps to a different current id.
    pub fn has_content_reorder(&self) -> bool {
        self.reorder
    }

    /// Whether any stored name has no current definition.
    pub fn has_missing_content(&self) -> bool {
        self.missing_content
    }

    /// Names that did not resolve, as issues.
    pub fn missing(&self) -> impl Iterator<Item = ContentIssue> + '_ {
        self.indices
            .iter()
            .zip(&self.names)
            .filter(|(id, _)| **id == self.missing_value)
            .map(|(_, name)| ContentIssue::Missing {
                content_type: self.content_type,
                name: name.clone(),
            })
    }
}

/// Immutable diff between a world's indices document and live content.
#[derive(Clone, Debug)]
pub struct ContentReport {
    /// Stored to current block ids.
    pub blocks: ContentUnitLut<BlockId>,
    /// Stored to current item ids.
    pub items: ContentUnitLut<ItemId>,
    region_version: u32,
    layout_changes: BTreeMap<String, LayoutChange>,
    data_loss: Vec<DataLossEntry>,
    issues: Vec<ContentIssue>,
}

impl ContentReport {
    /// Builds the report, or `None` when the world matches live content and
    /// needs no conversion.
    pub fn create(indices: &IndicesDocument, content: &Content) -> Option<Self> {
        let blocks = ContentUnitLut::new(
            ContentType::Block,
            &indices.blocks,
            &content.blocks,
            BLOCK_VOID,
        );
        let items =
            ContentUnitLut::new(ContentType::Item, &indices.items, &content.items, ITEM_VOID);

        let mut layout_changes = BTreeMap::new();
        let mut data_loss = Vec::new();
        for (name, old) in &indices.blocks_data {
            let Some(def) = content.blocks.find(name) else {
                continue;
            };
            let new = def.fields.clone();
            let issues = match &new {
                Some(new_layout) if new_layout == old => continue,
                Some(new_layout) => old.check_compatibility(new_layout),
                None => old
                    .fields()
                    .iter()
                    .map(|field| FieldIncompatibility {
                        name: field.name.clone(),
                        kind: FieldIncompatibilityType::Missing,
                    })
                    .collect(),
            };
            data_loss.extend(issues.into_iter().map(|issue| DataLossEntry {
                block: name.clone(),
                field: issue.name,
                kind: issue.kind,
            }));
            layout_changes.insert(
                name.clone(),
                LayoutChange {
                    old: old.clone(),
                    new,
                },
            );
        }

        let mut issues: Vec<ContentIssue> = blocks.missing().chain(items.missing()).collect();
        if indices.region_version < REGION_FORMAT_VERSION {
            issues.push(ContentIssue::RegionFormatUpdate {
                from: indices.region_version,
                to: REGION_FORMAT_VERSION,
            });
        }
        issues.extend(
            layout_changes
                .keys()
                .map(|block| ContentIssue::BlockDataLayoutUpdate {
                    block: block.clone(),
                }),
        );

        let report = Self {
            blocks,
            items,
            region_version: indices.region_version,
            layout_changes,
            data_loss,
            issues,
        };
        let needed = report.has_content_reorder()
            || report.has_missing_content()
            || report.has_updated_layouts()
            || report.is_upgrade_required();
        debug!(
            "content report: reorder={} missing={} layouts={} upgrade={}",
            report.has_content_reorder(),
            report.has_missing_content(),
            report.has_updated_layouts(),
            report.is_upgrade_required()
        );
        needed.then_some(report)
    }

    /// Builds the report for the world in `world_dir`; `None` for worlds
    /// without an indices document or without differences.
    pub fn load(world_dir: &Path, content: &Content) -> Result<Option<Self>> {
        Ok(IndicesDocument::load(world_dir)?.and_then(|indices| Self::create(&indices, content)))
    }

    /// Whether any stored block or item is missing from the content.
    pub fn has_missing_content(&self) -> bool {
        self.blocks.has_missing_content() || self.items.has_missing_content()
    }

    /// Whether stored block or item ids changed.
    pub fn has_content_reorder(&self) -> bool {
        self.blocks.has_content_reorder() || self.items.has_content_reorder()
    }

    /// Whether any block field layout changed.
    pub fn has_updated_layouts(&self) -> bool {
        !self.layout_changes.is_empty()
    }

    /// Whether region files predate the current format.
    pub fn is_upgrade_required(&self) -> bool {
        self.region_version < REGION_FORMAT_VERSION
    }

    /// Region format version recorded in the indices document.
    pub fn region_version(&self) -> u32 {
        self.region_version
    }

    /// Fields that lose data when converted.
    pub fn data_loss(&self) -> &[DataLossEntry] {
        &self.data_loss
    }

    /// Every difference found, for display.
    pub fn issues(&self) -> &[ContentIssue] {
        &self.issues
    }

    /// The issues that cannot be resolved by converting the world.
    pub fn missing_content(&self) -> Vec<ContentIssue> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, ContentIssue::Missing { .. }))
            .cloned()
            .collect()
    }

    /// Layout change recorded for the block named `block`.
    pub fn layout_change(&self, block: &str) -> Option<&LayoutChange> {
        self.layout_changes.get(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::struct_layout::{FieldConvertStrategy, FieldDescriptor, FieldType};
    use crate::content::{BlockDef, ItemDef};
    use proptest::prelude::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn document(blocks: &[&str]) -> IndicesDocument {
        IndicesDocument {
            region_version: REGION_FORMAT_VERSION,
            blocks: names(blocks),
            items: Vec::new(),
            blocks_data: BTreeMap::new(),
        }
    }

    #[test]
    fn swapped_blocks_are_reordered() {
        let content = Content::new(
            vec![BlockDef::new("core:air"), BlockDef::new("mod:dirt"), BlockDef::new("mod:stone")],
            Vec::new(),
        );
        let report = ContentReport::create(&document(&["core:air", "mod:stone", "mod:dirt"]), &content).unwrap();
        assert!(report.has_content_reorder());
        assert!(!report.has_missing_content());
        assert_eq!(report.blocks.get_id(0), 0);
        assert_eq!(report.blocks.get_id(1), 2);
        assert_eq!(report.blocks.get_id(2), 1);
        assert!(report.issues().is_empty());
    }

    #[test]
    fn identical_content_needs_no_report() {
        let content = Content::new(vec![BlockDef::new("core:air"), BlockDef::new("mod:stone")], Vec::new());
        assert!(ContentReport::create(&document(&["core:air", "mod:stone"]), &content).is_none());
        // appended content does not move existing ids
        assert!(ContentReport::create(&document(&["core:air"]), &content).is_none());
    }

    #[test]
    fn missing_content_is_listed() {
        let content = Content::new(vec![BlockDef::new("core:air")], vec![ItemDef::new("core:empty")]);
        let mut indices = document(&["core:air", "gone:ore"]);
        indices.items = names(&["core:empty", "gone:pick"]);
        let report = ContentReport::create(&indices, &content).unwrap();
        assert!(report.has_missing_content());
        assert!(!report.has_content_reorder());
        assert_eq!(report.blocks.get_id(1), BLOCK_VOID);
        assert_eq!(report.blocks.get_id(40), BLOCK_VOID);
        assert_eq!(
            report.missing_content(),
            vec![
                ContentIssue::Missing {
                    content_type: ContentType::Block,
                    name: "gone:ore".into()
                },
                ContentIssue::Missing {
                    content_type: ContentType::Item,
                    name: "gone:pick".into()
                },
            ]
        );
    }

    #[test]
    fn old_region_version_requires_upgrade() {
        let content = Content::new(vec![BlockDef::new("core:air")], Vec::new());
        let mut indices = document(&["core:air"]);
        indices.region_version = 2;
        let report = ContentReport::create(&indices, &content).unwrap();
        assert!(report.is_upgrade_required());
        assert_eq!(
            report.issues(),
            &[ContentIssue::RegionFormatUpdate {
                from: 2,
                to: REGION_FORMAT_VERSION
            }]
        );
    }

    #[test]
    fn narrowed_field_records_data_loss() {
        let old = StructLayout::create(vec![FieldDescriptor::new(FieldType::I16, "charge", 1)]).unwrap();
        let new = StructLayout::create(vec![
            FieldDescriptor::new(FieldType::I8, "charge", 1).with_strategy(FieldConvertStrategy::Clamp),
        ])
        .unwrap();
        let content = Content::new(
            vec![BlockDef::new("core:air"), BlockDef::new("mod:battery").with_fields(new)],
            Vec::new(),
        );
        let mut indices = document(&["core:air", "mod:battery"]);
        indices.blocks_data.insert("mod:battery".into(), old);

        let report = ContentReport::create(&indices, &content).unwrap();
        assert!(report.has_updated_layouts());
        assert_eq!(
            report.data_loss(),
            &[DataLossEntry {
                block: "mod:battery".into(),
                field: "charge".into(),
                kind: FieldIncompatibilityType::DataLoss
            }]
        );
        assert!(report.layout_change("mod:battery").unwrap().new.is_some());
    }

    #[test]
    fn block_without_fields_loses_everything() {
        let old = StructLayout::create(vec![
            FieldDescriptor::new(FieldType::I32, "a", 1),
            FieldDescriptor::new(FieldType::I32, "b", 1),
        ])
        .unwrap();
        let content = Content::new(vec![BlockDef::new("mod:chest")], Vec::new());
        let mut indices = document(&["mod:chest"]);
        indices.blocks_data.insert("mod:chest".into(), old);
        let report = ContentReport::create(&indices, &content).unwrap();
        assert_eq!(report.data_loss().len(), 2);
        assert!(report.layout_change("mod:chest").unwrap().new.is_none());
    }

    proptest! {
        #[test]
        fn reorder_iff_some_index_moved(order in Just((0..6).collect::<Vec<usize>>()).prop_shuffle()) {
            let current: Vec<BlockDef> = (0..6).map(|i| BlockDef::new(format!("pack:b{i}"))).collect();
            let defs = ContentUnitDefs::new(current);
            let stored: Vec<String> = order.iter().map(|i| format!("pack:b{i}")).collect();
            let lut = ContentUnitLut::new(ContentType::Block, &stored, &defs, BLOCK_VOID);
            let identity = order.iter().enumerate().all(|(index, id)| index == *id);
            prop_assert_eq!(lut.has_content_reorder(), !identity);
            prop_assert!(!lut.has_missing_content());
            for (index, id) in order.iter().enumerate() {
                prop_assert_eq!(lut.get_id(index as BlockId) as usize, *id);
            }
        }
    }
}
