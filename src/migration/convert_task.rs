//! # Convert Tasks
//!
//! One unit of migration work: a single region file of a single layer, or
//! the player file. Running a task only decodes, transforms and stages data
//! in memory; nothing reaches disk until the whole pass is flushed.

use std::fmt;
use std::sync::Arc;

use log::warn;

use super::{ConvertContext, ConvertMode};
use crate::error::Result;
use crate::storage::{RegionKey, RegionLayerId, REGION_FORMAT_VERSION};
use crate::task_management::Task;
use crate::voxels::chunk::{decode_voxels, decode_voxels_v2, encode_voxels};
use crate::voxels::PlayerFile;

/// What a task rewrites.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConvertTarget {
    /// One region file.
    Region {
        /// Layer the file belongs to.
        layer: RegionLayerId,
        /// Region the file holds.
        key: RegionKey,
    },
    /// The world's player file.
    Player,
}

/// One unit of work of a migration pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertTask {
    /// Pass the task belongs to.
    pub mode: ConvertMode,
    /// File the task rewrites.
    pub target: ConvertTarget,
}

impl ConvertTask {
    /// A task rewriting one region file of `layer`.
    pub fn region(mode: ConvertMode, layer: RegionLayerId, key: RegionKey) -> Self {
        Self {
            mode,
            target: ConvertTarget::Region { layer, key },
        }
    }

    /// A task rewriting the player file.
    pub fn player(mode: ConvertMode) -> Self {
        Self {
            mode,
            target: ConvertTarget::Player,
        }
    }

    /// Applies the pass to the target, staging the result in `context`.
    pub fn run(&self, context: &ConvertContext) -> Result<()> {
        match (self.mode, self.target) {
            (ConvertMode::Upgrade, ConvertTarget::Region { layer, key }) => {
                upgrade_region(context, layer, key)
            }
            (ConvertMode::Reindex, ConvertTarget::Region { layer, key }) => match layer {
                RegionLayerId::Voxels => reindex_voxels(context, key),
                RegionLayerId::Inventories => reindex_inventories(context, key),
                _ => Ok(()),
            },
            (ConvertMode::Reindex, ConvertTarget::Player) => reindex_player(context),
            (ConvertMode::BlockFields, ConvertTarget::Region { key, .. }) => {
                convert_blocks_data(context, key)
            }
            (_, ConvertTarget::Player) => Ok(()),
        }
    }
}

impl fmt::Display for ConvertTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            ConvertTarget::Region { layer, key } => {
                write!(f, "{} {} region {}", self.mode, layer, key)
            }
            ConvertTarget::Player => write!(f, "{} player file", self.mode),
        }
    }
}

/// A task bound to the shared context, ready for a worker thread.
pub struct ScheduledConvertTask {
    task: ConvertTask,
    context: Arc<ConvertContext>,
}

impl ScheduledConvertTask {
    /// Binds `task` to `context`.
    pub fn new(task: ConvertTask, context: Arc<ConvertContext>) -> Self {
        Self { task, context }
    }
}

impl Task for ScheduledConvertTask {
    fn name(&self) -> String {
        self.task.to_string()
    }

    fn process(&self) -> Result<()> {
        self.task.run(&self.context)
    }
}

fn upgrade_region(context: &ConvertContext, layer: RegionLayerId, key: RegionKey) -> Result<()> {
    context
        .regions
        .layer(layer)
        .upgrade_region(key, |version, data| match layer {
            RegionLayerId::Voxels if version < REGION_FORMAT_VERSION => {
                encode_voxels(&decode_voxels_v2(&data)?)
            }
            _ => Ok(data),
        })?;
    Ok(())
}

fn reindex_voxels(context: &ConvertContext, key: RegionKey) -> Result<()> {
    let lut = &context.report.blocks;
    context
        .regions
        .process_region(key, RegionLayerId::Voxels, |_, data| {
            let mut voxels = decode_voxels(&data)?;
            let mut changed = false;
            for voxel in &mut voxels {
                let id = lut.get_id(voxel.id);
                if id != voxel.id {
                    voxel.id = id;
                    changed = true;
                }
            }
            if changed {
                Ok(Some(encode_voxels(&voxels)?))
            } else {
                Ok(None)
            }
        })?;
    Ok(())
}

fn reindex_inventories(context: &ConvertContext, key: RegionKey) -> Result<()> {
    let lut = &context.report.items;
    context.regions.process_inventories(key, |_, inventories| {
        let before = inventories.clone();
        inventories.remap_items(|item| lut.get_id(item));
        Ok(*inventories != before)
    })?;
    Ok(())
}

fn reindex_player(context: &ConvertContext) -> Result<()> {
    let mut player = context.player.lock().unwrap();
    if player.is_none() {
        *player = PlayerFile::load(&context.world_dir)?;
    }
    if let Some(file) = player.as_mut() {
        let lut = &context.report.items;
        file.remap_items(|item| lut.get_id(item));
    }
    Ok(())
}

/// Converts the custom field records of every chunk of one region.
///
/// Records are matched to their block through the voxels layer, which by
/// now holds current ids. A record whose block lost its fields is dropped;
/// a chunk whose voxels cannot be found is left unchanged.
fn convert_blocks_data(context: &ConvertContext, key: RegionKey) -> Result<()> {
    context.regions.process_blocks_data(key, |pos, heap| {
        let Some(voxels) = context.regions.get_voxels(pos)? else {
            warn!(
                "No voxels for chunk ({}, {}), keeping its block data unchanged",
                pos.x, pos.z
            );
            return Ok(false);
        };

        let indices: Vec<u32> = heap.iter().map(|(index, _)| index).collect();
        let mut changed = false;
        for index in indices {
            let block_id = voxels[index as usize].id;
            let Some(block) = context.content.blocks.get(block_id as usize) else {
                warn!(
                    "Block data at {} of chunk ({}, {}) belongs to unknown block {}",
                    index, pos.x, pos.z, block_id
                );
                continue;
            };
            let Some(change) = context.report.layout_change(&block.name) else {
                continue;
            };
            match &change.new {
                Some(new_layout) => {
                    let Some(record) = heap.get(index) else {
                        continue;
                    };
                    let mut converted = vec![0u8; new_layout.size()];
                    new_layout.convert(
                        &change.old,
                        record,
                        &mut converted,
                        context.allow_data_loss,
                    )?;
                    heap.set(index, converted)?;
                }
                None => {
                    warn!(
                        "Dropping block data of '{}' at {} of chunk ({}, {}): the block has no fields anymore",
                        block.name, index, pos.x, pos.z
                    );
                    heap.remove(index);
                }
            }
            changed = true;
        }
        Ok(changed)
    })?;
    // voxels were only read to resolve block types
    context.regions.layer(RegionLayerId::Voxels).unload_saved();
    Ok(())
}
