#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Storage
//!
//! Persistent world storage for a voxel engine: a coordinate-addressed blob
//! store for chunk data, layered by data kind, plus the migration subsystem
//! that keeps stored worlds readable after content definitions change.
//!
//! ## Key Modules
//!
//! * `coders` - byte codec, run-length codecs and per-layer compression
//! * `content` - live content definitions, per-block field layouts, the
//!   persisted indices document and the report diffing the two
//! * `voxels` - decoded chunk payloads and their encodings
//! * `storage` - region files, the bounded file pool and the layered store
//! * `task_management` - worker pool used to run migrations in parallel
//! * `migration` - the upgrade, reindex and block field passes
//!
//! ## Architecture
//!
//! The storage layer never interprets chunk payloads: it compresses, stages
//! and flushes opaque byte arrays per layer. Everything that needs to know
//! what the bytes mean (the typed `WorldRegions` API and the migration
//! passes) goes through the `voxels` codecs.
//!
//! ## Usage
//!
//! ```no_run
//! use voxel_storage::storage::{ChunkPos, WorldRegions};
//! use voxel_storage::voxels::{Voxel, CHUNK_VOL};
//!
//! let regions = WorldRegions::new("saves/world", 32);
//! let pos = ChunkPos::new(4, -2);
//! regions.put_voxels(pos, &vec![Voxel::new(1, 0); CHUNK_VOL])?;
//! assert!(regions.get_voxels(pos)?.is_some());
//! regions.write_all()?;
//! # Ok::<(), voxel_storage::error::StorageError>(())
//! ```

use std::env;
use std::path::PathBuf;
use std::process;

use log::{error, info};

use config::StorageSettings;
use content::content_report::ContentReport;
use content::Content;
use error::{Result, StorageError};

pub mod coders;
pub mod config;
pub mod content;
pub mod error;
pub mod migration;
pub mod storage;
pub mod task_management;
pub mod voxels;

const USAGE: &str = "usage: voxel-storage <world-dir> <content.json> [--check]";

struct Arguments {
    world_dir: PathBuf,
    content: PathBuf,
    check_only: bool,
}

fn parse_arguments(args: &[String]) -> Option<Arguments> {
    let mut check_only = false;
    let mut paths = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--check" => check_only = true,
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    let [world_dir, content] = <[PathBuf; 2]>::try_from(paths).ok()?;
    Some(Arguments {
        world_dir,
        content,
        check_only,
    })
}

fn print_report(report: &ContentReport) {
    for issue in report.issues() {
        println!("issue: {issue:?}");
    }
    for loss in report.data_loss() {
        println!(
            "data loss: {} field '{}' ({:?})",
            loss.block, loss.field, loss.kind
        );
    }
}

fn check_and_convert(arguments: &Arguments) -> Result<()> {
    let settings = StorageSettings::load(&arguments.world_dir)?;
    let content = Content::load(&arguments.content)?;

    let Some(report) = ContentReport::load(&arguments.world_dir, &content)? else {
        println!("world is up to date");
        return Ok(());
    };
    print_report(&report);
    if report.has_missing_content() {
        return Err(StorageError::UnresolvableContent(report.missing_content()));
    }
    if arguments.check_only {
        return Ok(());
    }

    let passes = migration::convert_world(&arguments.world_dir, content, &settings)?;
    for pass in passes {
        println!("completed {pass} pass");
    }
    Ok(())
}

/// Entry point of the maintenance binary.
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();
    info!("Logger initialized");

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(arguments) = parse_arguments(&args) else {
        eprintln!("{USAGE}");
        process::exit(2);
    };
    if let Err(err) = check_and_convert(&arguments) {
        error!("{}", err);
        if let StorageError::UnresolvableContent(issues) = &err {
            for issue in issues {
                eprintln!("missing: {issue:?}");
            }
        }
        eprintln!("error: {err}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn arguments_need_world_and_content() {
        let parsed = parse_arguments(&strings(&["world", "content.json", "--check"])).unwrap();
        assert_eq!(parsed.world_dir, PathBuf::from("world"));
        assert!(parsed.check_only);

        assert!(parse_arguments(&strings(&["world"])).is_none());
        assert!(parse_arguments(&strings(&["a", "b", "c"])).is_none());
    }
}
