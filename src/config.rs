//! # Storage Settings
//!
//! Tunables of the storage engine, read from `<world>/storage.json` when the
//! world carries one. Missing keys fall back to their defaults, and the
//! `VOXEL_STORAGE_THREADS` environment variable overrides the worker count.

use std::env;
use std::fs;
use std::path::Path;
use std::thread;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings file inside the world directory.
pub const SETTINGS_FILE: &str = "storage.json";
/// Environment variable overriding `worker-threads`.
pub const THREADS_ENV: &str = "VOXEL_STORAGE_THREADS";

fn default_max_open_files() -> usize {
    32
}

fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|threads| threads.get())
        .unwrap_or(1)
}

fn default_allow_data_loss() -> bool {
    true
}

/// Storage tuning read from `storage.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageSettings {
    /// Open region files per layer before idle ones get evicted.
    #[serde(default = "default_max_open_files")]
    pub max_open_files: usize,
    /// Worker threads used by migrations; 0 or 1 runs them on the caller.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Whether block field conversion may clamp or reset narrowed fields.
    #[serde(default = "default_allow_data_loss")]
    pub allow_data_loss: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            max_open_files: default_max_open_files(),
            worker_threads: default_worker_threads(),
            allow_data_loss: default_allow_data_loss(),
        }
    }
}

impl StorageSettings {
    /// Loads the settings of `world_dir`, then applies environment overrides.
    pub fn load(world_dir: &Path) -> Result<Self> {
        let path = world_dir.join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        if let Ok(value) = env::var(THREADS_ENV) {
            settings.apply_threads_override(&value);
        }
        Ok(settings)
    }

    fn apply_threads_override(&mut self, value: &str) {
        match value.trim().parse() {
            Ok(threads) => self.worker_threads = threads,
            Err(_) => warn!("Ignoring {}={:?}: not a thread count", THREADS_ENV, value),
        }
    }
}
