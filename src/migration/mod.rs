//! # World Migration
//!
//! Keeps stored worlds readable after content changes. A migration consumes
//! one [`ContentReport`] and runs up to three passes, always in this order:
//!
//! 1. **Upgrade**: rewrite region files with an outdated format version
//! 2. **Reindex**: remap stored block and item ids to the current load order
//! 3. **BlockFields**: convert per-block custom field records to their new
//!    layouts; resolves blocks by id and so needs the reindexed voxels
//!
//! Each pass enumerates its tasks up front, runs them (on the caller or on a
//! worker pool), and only flushes to disk after every task succeeded. A
//! failed pass leaves the files on disk exactly as they were.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::info;

use crate::config::StorageSettings;
use crate::content::content_report::ContentReport;
use crate::content::indices::IndicesDocument;
use crate::content::Content;
use crate::error::{Result, StorageError};
use crate::storage::{WorldRegions, REGION_FORMAT_VERSION};
use crate::voxels::PlayerFile;

pub mod convert_task;
pub mod world_converter;

pub use convert_task::{ConvertTarget, ConvertTask};
pub use world_converter::{Job, WorldConverter};

/// One migration pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConvertMode {
    /// Rewrites region files in the current format.
    Upgrade,
    /// Remaps stored block and item ids to the current ones.
    Reindex,
    /// Converts custom block records to their current layouts.
    BlockFields,
}

impl ConvertMode {
    /// Every pass, in execution order.
    pub const ALL: [ConvertMode; 3] = [
        ConvertMode::Upgrade,
        ConvertMode::Reindex,
        ConvertMode::BlockFields,
    ];
}

impl fmt::Display for ConvertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConvertMode::Upgrade => "upgrade",
            ConvertMode::Reindex => "reindex",
            ConvertMode::BlockFields => "block-fields",
        })
    }
}

/// The checked sequence of passes a report calls for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvertPhases {
    planned: Vec<ConvertMode>,
    completed: Vec<ConvertMode>,
}

impl ConvertPhases {
    /// Plans the passes needed to bring the reported world up to date.
    pub fn plan(report: &ContentReport) -> Self {
        let planned = ConvertMode::ALL
            .into_iter()
            .filter(|mode| match mode {
                ConvertMode::Upgrade => report.is_upgrade_required(),
                ConvertMode::Reindex => report.has_content_reorder(),
                ConvertMode::BlockFields => report.has_updated_layouts(),
            })
            .collect();
        Self {
            planned,
            completed: Vec::new(),
        }
    }

    /// Passes the report asks for, in execution order.
    pub fn planned(&self) -> &[ConvertMode] {
        &self.planned
    }

    /// Passes that finished.
    pub fn completed(&self) -> &[ConvertMode] {
        &self.completed
    }

    /// The first planned pass that has not completed yet.
    pub fn next(&self) -> Option<ConvertMode> {
        self.planned
            .iter()
            .copied()
            .find(|mode| !self.completed.contains(mode))
    }

    /// Whether every planned pass finished.
    pub fn is_complete(&self) -> bool {
        self.next().is_none()
    }

    /// Checks that every planned pass before `mode` has completed.
    pub fn begin(&self, mode: ConvertMode) -> Result<()> {
        match self
            .planned
            .iter()
            .copied()
            .find(|&planned| planned < mode && !self.completed.contains(&planned))
        {
            Some(missing) => Err(StorageError::PhaseOrder {
                requested: mode,
                missing,
            }),
            None => Ok(()),
        }
    }

    /// Records `mode` as finished.
    pub fn complete(&mut self, mode: ConvertMode) {
        if !self.completed.contains(&mode) {
            self.completed.push(mode);
        }
    }
}

/// State shared by every task of a migration.
pub struct ConvertContext {
    /// World being converted.
    pub world_dir: PathBuf,
    /// Region stores of the world.
    pub regions: Arc<WorldRegions>,
    /// Content the world is converted to.
    pub content: Content,
    /// Differences between the stored and the live content.
    pub report: ContentReport,
    /// Whether narrowing conversions may drop data.
    pub allow_data_loss: bool,
    /// The player file, loaded by the first task that needs it and saved
    /// with the rest of the pass.
    pub player: Mutex<Option<PlayerFile>>,
}

impl ConvertContext {
    /// Shares `regions` and the report with the tasks of a migration.
    pub fn new(
        regions: Arc<WorldRegions>,
        content: Content,
        report: ContentReport,
        allow_data_loss: bool,
    ) -> Self {
        Self {
            world_dir: regions.directory().to_path_buf(),
            regions,
            content,
            report,
            allow_data_loss,
            player: Mutex::new(None),
        }
    }

    /// Records a finished pass in the world's indices document.
    pub fn patch_indices(&self, mode: ConvertMode) -> Result<()> {
        let mut indices = match IndicesDocument::load(&self.world_dir)? {
            Some(indices) => indices,
            None => IndicesDocument::from_content(&self.content, self.report.region_version()),
        };
        match mode {
            ConvertMode::Upgrade => indices.region_version = REGION_FORMAT_VERSION,
            ConvertMode::Reindex => {
                indices.blocks = self.content.blocks.names();
                indices.items = self.content.items.names();
            }
            ConvertMode::BlockFields => {
                indices.blocks_data =
                    IndicesDocument::from_content(&self.content, indices.region_version)
                        .blocks_data;
            }
        }
        indices.save(&self.world_dir)
    }
}

/// Brings the world in `world_dir` up to date with `content`.
///
/// Returns the passes that were run, empty when the world already matched.
///
/// # Errors
/// [`StorageError::UnresolvableContent`] if the world references content
/// that is not loaded; nothing is converted in that case.
pub fn convert_world(
    world_dir: &Path,
    content: Content,
    settings: &StorageSettings,
) -> Result<Vec<ConvertMode>> {
    let Some(report) = ContentReport::load(world_dir, &content)? else {
        info!("World {:?} matches the loaded content", world_dir);
        return Ok(Vec::new());
    };
    if report.has_missing_content() {
        return Err(StorageError::UnresolvableContent(report.missing_content()));
    }

    let mut phases = ConvertPhases::plan(&report);
    let regions = Arc::new(WorldRegions::with_settings(world_dir, settings));
    let context = Arc::new(ConvertContext::new(
        regions,
        content,
        report,
        settings.allow_data_loss,
    ));

    while let Some(mode) = phases.next() {
        phases.begin(mode)?;
        let mut converter = WorldConverter::new(context.clone(), mode, settings.worker_threads)?;
        converter.wait_for_end()?;
        phases.complete(mode);
    }
    Ok(phases.completed().to_vec())
}
