//! # Voxel Storage Maintenance Tool
//!
//! Checks a world against a content definitions file and converts it when
//! the content changed. All the work happens in the library's `run()`.
//!
//! ## Usage
//!
//! ```bash
//! voxel-storage saves/world content.json --check
//! ```

fn main() {
    voxel_storage::run();
}
