//! # Chunk Payloads
//!
//! Fixed-size voxel and light arrays of a single chunk and their byte
//! encodings. A chunk is a 16x256x16 column of voxels; voxels are indexed
//! x-fastest, then z, then y.
//!
//! ## Voxel payload versions
//! * version 3 (current): all ids as little-endian `u16`, followed by all
//!   states, so each half compresses into long runs
//! * version 2 (legacy): interleaved big-endian `(id, state)` pairs

use crate::coders::{ByteBuilder, ByteReader, Endian};
use crate::content::BlockId;
use crate::error::{Result, StorageError};

/// Width of a chunk along the x axis.
pub const CHUNK_W: usize = 16;
/// Height of a chunk along the y axis.
pub const CHUNK_H: usize = 256;
/// Depth of a chunk along the z axis.
pub const CHUNK_D: usize = 16;
/// Number of voxels in one chunk.
pub const CHUNK_VOL: usize = CHUNK_W * CHUNK_H * CHUNK_D;

/// Size of an encoded voxel array in bytes.
pub const VOXELS_DATA_SIZE: usize = CHUNK_VOL * 4;
/// Size of an encoded light array in bytes.
pub const LIGHTS_DATA_SIZE: usize = CHUNK_VOL * 2;

/// Index of the voxel at chunk-local coordinates.
pub fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    (y * CHUNK_D + z) * CHUNK_W + x
}

/// A single voxel: block id plus block-specific state bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Voxel {
    /// Block type.
    pub id: BlockId,
    /// Block state bits.
    pub state: u16,
}

impl Voxel {
    /// A voxel of block `id` in `state`.
    pub fn new(id: BlockId, state: u16) -> Self {
        Self { id, state }
    }
}

fn check_size(actual: usize, expected: usize, what: &str) -> Result<()> {
    if actual != expected {
        return Err(StorageError::InvalidInput(format!(
            "{what} must hold {expected} entries, got {actual}"
        )));
    }
    Ok(())
}

/// Encodes a full chunk of voxels in the current (planar) layout.
pub fn encode_voxels(voxels: &[Voxel]) -> Result<Vec<u8>> {
    check_size(voxels.len(), CHUNK_VOL, "voxel array")?;
    let mut builder = ByteBuilder::with_capacity(VOXELS_DATA_SIZE).with_endian(Endian::Little);
    for voxel in voxels {
        builder.put_u16(voxel.id);
    }
    for voxel in voxels {
        builder.put_u16(voxel.state);
    }
    Ok(builder.build())
}

/// Decodes a voxel array written by [`encode_voxels`].
pub fn decode_voxels(data: &[u8]) -> Result<Vec<Voxel>> {
    check_size(data.len(), VOXELS_DATA_SIZE, "voxel payload")?;
    let (ids, states) = data.split_at(CHUNK_VOL * 2);
    let mut ids = ByteReader::new(ids).with_endian(Endian::Little);
    let mut states = ByteReader::new(states).with_endian(Endian::Little);
    let mut voxels = Vec::with_capacity(CHUNK_VOL);
    for _ in 0..CHUNK_VOL {
        voxels.push(Voxel::new(ids.get_u16()?, states.get_u16()?));
    }
    Ok(voxels)
}

/// Encodes a voxel array in the version 2 interleaved layout.
pub fn encode_voxels_v2(voxels: &[Voxel]) -> Result<Vec<u8>> {
    check_size(voxels.len(), CHUNK_VOL, "voxel array")?;
    let mut builder = ByteBuilder::with_capacity(VOXELS_DATA_SIZE);
    for voxel in voxels {
        builder.put_u16(voxel.id).put_u16(voxel.state);
    }
    Ok(builder.build())
}

/// Decodes a version 2 interleaved voxel array.
pub fn decode_voxels_v2(data: &[u8]) -> Result<Vec<Voxel>> {
    check_size(data.len(), VOXELS_DATA_SIZE, "voxel payload")?;
    let mut reader = ByteReader::new(data);
    let mut voxels = Vec::with_capacity(CHUNK_VOL);
    for _ in 0..CHUNK_VOL {
        let id = reader.get_u16()?;
        let state = reader.get_u16()?;
        voxels.push(Voxel::new(id, state));
    }
    Ok(voxels)
}

/// Encodes a full chunk of light values.
pub fn encode_lights(lights: &[u16]) -> Result<Vec<u8>> {
    check_size(lights.len(), CHUNK_VOL, "light array")?;
    let mut builder = ByteBuilder::with_capacity(LIGHTS_DATA_SIZE).with_endian(Endian::Little);
    for &light in lights {
        builder.put_u16(light);
    }
    Ok(builder.build())
}

/// Decodes a little-endian light payload.
pub fn decode_lights(data: &[u8]) -> Result<Vec<u16>> {
    check_size(data.len(), LIGHTS_DATA_SIZE, "light payload")?;
    let mut reader = ByteReader::new(data).with_endian(Endian::Little);
    (0..CHUNK_VOL).map(|_| reader.get_u16()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Voxel> {
        (0..CHUNK_VOL)
            .map(|index| Voxel::new((index / 4096) as BlockId, (index % 3) as u16))
            .collect()
    }

    #[test]
    fn planar_layout_groups_ids_before_states() {
        let voxels = sample();
        let data = encode_voxels(&voxels).unwrap();
        assert_eq!(data.len(), VOXELS_DATA_SIZE);
        // voxel 4096 has id 1, stored little-endian in the id half
        assert_eq!(&data[8192..8194], &[1, 0]);
        // voxel 1 has state 1, stored in the state half
        assert_eq!(&data[CHUNK_VOL * 2 + 2..CHUNK_VOL * 2 + 4], &[1, 0]);
        assert_eq!(decode_voxels(&data).unwrap(), voxels);
    }

    #[test]
    fn legacy_layout_interleaves_big_endian_pairs() {
        let voxels = sample();
        let data = encode_voxels_v2(&voxels).unwrap();
        assert_eq!(&data[4096 * 4..4096 * 4 + 4], &[0, 1, 0, 1]);
        assert_eq!(decode_voxels_v2(&data).unwrap(), voxels);
    }

    #[test]
    fn wrong_sizes_are_rejected() {
        assert!(encode_voxels(&[Voxel::default(); 3]).is_err());
        assert!(decode_voxels(&[0u8; 12]).is_err());
        assert!(decode_lights(&[0u8; LIGHTS_DATA_SIZE - 2]).is_err());
    }

    #[test]
    fn lights_roundtrip() {
        let lights: Vec<u16> = (0..CHUNK_VOL).map(|index| (index % 16) as u16).collect();
        let data = encode_lights(&lights).unwrap();
        assert_eq!(decode_lights(&data).unwrap(), lights);
    }

    #[test]
    fn index_is_x_fastest() {
        assert_eq!(voxel_index(1, 0, 0), 1);
        assert_eq!(voxel_index(0, 0, 1), CHUNK_W);
        assert_eq!(voxel_index(0, 1, 0), CHUNK_W * CHUNK_D);
        assert_eq!(voxel_index(15, 255, 15), CHUNK_VOL - 1);
    }
}
