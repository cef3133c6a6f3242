//! # Chunk Payloads
//!
//! Decoded forms of everything a world stores per chunk, and their binary
//! encodings. The storage layer only moves opaque byte arrays around; this
//! module gives those bytes a shape.
//!
//! ## Components
//!
//! * **chunk**: voxel and light arrays, current and legacy voxel layouts
//! * **inventories**: block inventories keyed by voxel index
//! * **blocks_metadata**: sparse heap of per-block custom field records
//! * **player**: the player file with its inventories

pub mod blocks_metadata;
pub mod chunk;
pub mod inventories;
pub mod player;

pub use blocks_metadata::BlocksMetadata;
pub use chunk::{Voxel, CHUNK_D, CHUNK_H, CHUNK_VOL, CHUNK_W};
pub use inventories::{ChunkInventories, Inventory, ItemStack};
pub use player::PlayerFile;
