//! # Region Storage
//!
//! Coordinate-addressed blob store for per-chunk world data. Chunks are
//! grouped into regions of 32x32 chunk slots, and each region of each layer
//! is one physical file.
//!
//! ## Architecture
//!
//! * **region_file**: on-disk format, reader and writer
//! * **world_region**: in-memory staging of one region's compressed slots
//! * **file_pool**: bounded pool of open region files with exclusive guards
//! * **regions_layer**: the store of a single layer (map + pool + policy)
//! * **world_regions**: the five layers of one world behind a typed API
//!
//! ## Data Flow
//!
//! 1. `put` compresses a payload and stages it in memory; nothing touches disk
//! 2. `get_data` serves staged slots first, then falls back to the file
//! 3. `write_all` merges untouched on-disk slots into every dirty region and
//!    overwrites its file in one sequential write
//!
//! ## Thread Safety
//!
//! Every layer guards its region map with a mutex and its open files with a
//! separate mutex and condition variable. Acquiring a file is the only
//! blocking point: callers wait until another thread releases a handle.

use std::fmt;

use crate::coders::Method;

pub mod file_pool;
pub mod region_file;
pub mod regions_layer;
pub mod world_region;
pub mod world_regions;

pub use file_pool::{RegionFileGuard, RegionFilePool, RegionWriteGuard};
pub use region_file::RegionFile;
pub use regions_layer::RegionsLayer;
pub use world_region::WorldRegion;
pub use world_regions::WorldRegions;

/// Number of chunk slots along each side of a region.
pub const REGION_SIZE: i32 = 32;
/// Number of chunk slots in one region.
pub const REGION_CHUNKS_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;
/// Version written into the header of every new region file.
pub const REGION_FORMAT_VERSION: u32 = 3;
/// Oldest version that can still be upgraded in place.
pub const MIN_REGION_FORMAT_VERSION: u32 = 2;
/// Leading bytes of every region file.
pub const REGION_MAGIC: &[u8; 8] = b".VOXREG\0";

/// Global position of a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    /// Chunk column along X.
    pub x: i32,
    /// Chunk column along Z.
    pub z: i32,
}

impl ChunkPos {
    /// Chunk at `(x, z)`.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The region containing this chunk.
    pub fn region(self) -> RegionKey {
        RegionKey::new(
            self.x.div_euclid(REGION_SIZE),
            self.z.div_euclid(REGION_SIZE),
        )
    }

    /// Slot index of this chunk inside its region (row-major, x fastest).
    pub fn local_index(self) -> usize {
        let local_x = self.x.rem_euclid(REGION_SIZE);
        let local_z = self.z.rem_euclid(REGION_SIZE);
        (local_z * REGION_SIZE + local_x) as usize
    }
}

/// Position of a region in region units. Names one file per layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    /// Region along X.
    pub x: i32,
    /// Region along Z.
    pub z: i32,
}

impl RegionKey {
    /// Region at `(x, z)`.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Global position of the chunk in slot `index` of this region.
    pub fn chunk(self, index: usize) -> ChunkPos {
        let index = index as i32;
        ChunkPos::new(
            self.x * REGION_SIZE + index % REGION_SIZE,
            self.z * REGION_SIZE + index / REGION_SIZE,
        )
    }

    /// File name of the region, `<x>_<z>.bin`.
    pub fn file_name(self) -> String {
        format!("{}_{}.bin", self.x, self.z)
    }

    /// Whether every chunk of the region has a representable position.
    pub fn is_addressable(self) -> bool {
        let range = (i32::MIN / REGION_SIZE)..=(i32::MAX / REGION_SIZE);
        range.contains(&self.x) && range.contains(&self.z)
    }

    /// Parses a file name produced by [`RegionKey::file_name`]. Names of
    /// regions beyond the chunk coordinate range are rejected.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".bin")?;
        let (x, z) = stem.split_once('_')?;
        Some(Self::new(x.parse().ok()?, z.parse().ok()?)).filter(|key| key.is_addressable())
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// The independent kinds of per-chunk data a world stores.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionLayerId {
    /// Block ids and states.
    Voxels,
    /// Light levels.
    Lights,
    /// Container contents.
    Inventories,
    /// Entity snapshots as JSON.
    Entities,
    /// Custom block field records.
    BlocksData,
}

impl RegionLayerId {
    /// Every layer a world stores.
    pub const ALL: [RegionLayerId; 5] = [
        RegionLayerId::Voxels,
        RegionLayerId::Lights,
        RegionLayerId::Inventories,
        RegionLayerId::Entities,
        RegionLayerId::BlocksData,
    ];

    /// Folder of the layer inside the world directory.
    pub fn folder(self) -> &'static str {
        match self {
            RegionLayerId::Voxels => "regions",
            RegionLayerId::Lights => "lights",
            RegionLayerId::Inventories => "inventories",
            RegionLayerId::Entities => "entities",
            RegionLayerId::BlocksData => "blocksdata",
        }
    }

    /// Compression applied to every blob of the layer.
    pub fn compression(self) -> Method {
        match self {
            RegionLayerId::Voxels => Method::ExtRle16,
            RegionLayerId::Lights => Method::ExtRle8,
            RegionLayerId::Inventories | RegionLayerId::Entities => Method::None,
            RegionLayerId::BlocksData => Method::Gzip,
        }
    }
}

impl fmt::Display for RegionLayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}
