//! # Region File Format
//!
//! ```text
//! header   ".VOXREG\0" | u8 version | u8 compression tag
//! entries  [u32 blob length][u32 source length][blob] per occupied slot
//! trailer  1024 x u32 absolute entry offsets, 0 for an empty slot
//! ```
//!
//! All integers are big-endian. Offsets are indexed by the slot's local
//! position, `local_z * 32 + local_x`.
//!
//! Files are never patched in place: a region is always rewritten as a
//! whole by [`RegionFile::write`].

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;

use super::{MIN_REGION_FORMAT_VERSION, REGION_CHUNKS_COUNT, REGION_FORMAT_VERSION, REGION_MAGIC};
use crate::coders::{ByteBuilder, ByteReader, Method};
use crate::error::{Result, StorageError};

/// Magic, version and compression tag.
pub const REGION_HEADER_SIZE: usize = REGION_MAGIC.len() + 2;
/// Size of the offset table at the end of every file.
pub const REGION_TRAILER_SIZE: usize = REGION_CHUNKS_COUNT * 4;
const ENTRY_HEADER_SIZE: usize = 8;

/// One compressed chunk as stored in a region slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkBlob {
    /// Compressed bytes.
    pub data: Vec<u8>,
    /// Size of the payload before compression.
    pub source_len: usize,
}

impl ChunkBlob {
    /// Wraps compressed `data` that decompresses to `source_len` bytes.
    pub fn new(data: Vec<u8>, source_len: usize) -> Self {
        Self { data, source_len }
    }
}

struct RegionHeader {
    version: u32,
    compression: Method,
}

fn parse_header(path: &Path, bytes: &[u8]) -> Result<RegionHeader> {
    let mut reader = ByteReader::new(bytes);
    if !reader.check_magic(REGION_MAGIC)? {
        return Err(StorageError::format(path, "not a region file"));
    }
    let version = reader.get_u8()? as u32;
    if version > REGION_FORMAT_VERSION {
        return Err(StorageError::format(
            path,
            format!("version {version} is newer than supported {REGION_FORMAT_VERSION}"),
        ));
    }
    if version < MIN_REGION_FORMAT_VERSION {
        return Err(StorageError::format(
            path,
            format!("version {version} is too old to be upgraded"),
        ));
    }
    let tag = reader.get_u8()?;
    let compression = Method::from_tag(tag)
        .ok_or_else(|| StorageError::format(path, format!("unknown compression tag {tag}")))?;
    Ok(RegionHeader {
        version,
        compression,
    })
}

fn read_header_bytes(path: &Path, file: &mut File) -> Result<[u8; REGION_HEADER_SIZE]> {
    let mut header = [0u8; REGION_HEADER_SIZE];
    file.read_exact(&mut header).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StorageError::format(path, "file is shorter than the region header")
        } else {
            StorageError::Io(err)
        }
    })?;
    Ok(header)
}

/// An open region file, ready for random slot reads.
#[derive(Debug)]
pub struct RegionFile {
    file: File,
    path: PathBuf,
    version: u32,
    compression: Method,
    offsets: Vec<u32>,
    trailer_start: u64,
}

impl RegionFile {
    /// Opens and validates an existing region file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let header = parse_header(&path, &read_header_bytes(&path, &mut file)?)?;

        let file_len = file.metadata()?.len();
        let min_len = (REGION_HEADER_SIZE + REGION_TRAILER_SIZE) as u64;
        if file_len < min_len {
            return Err(StorageError::Corrupted(format!(
                "region file {path:?} is {file_len} bytes, too short for its offset table"
            )));
        }
        let trailer_start = file_len - REGION_TRAILER_SIZE as u64;
        file.seek(SeekFrom::Start(trailer_start))?;
        let mut trailer = BufReader::with_capacity(REGION_TRAILER_SIZE, &file);
        let offsets = (0..REGION_CHUNKS_COUNT)
            .map(|_| trailer.read_u32::<BigEndian>())
            .collect::<std::io::Result<Vec<_>>>()?;

        debug!(
            "Opened region file {:?} (version {}, {:?})",
            path, header.version, header.compression
        );
        Ok(Self {
            file,
            path,
            version: header.version,
            compression: header.compression,
            offsets,
            trailer_start,
        })
    }

    /// Reads only the header version of the file at `path`.
    pub fn peek_version(path: &Path) -> Result<u32> {
        let mut file = File::open(path)?;
        let header = parse_header(path, &read_header_bytes(path, &mut file)?)?;
        Ok(header.version)
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format version from the header.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Compression of every blob in the file.
    pub fn compression(&self) -> Method {
        self.compression
    }

    /// Whether the file predates the current format.
    pub fn is_upgrade_required(&self) -> bool {
        self.version < REGION_FORMAT_VERSION
    }

    /// Whether slot `index` holds a chunk.
    pub fn has_chunk(&self, index: usize) -> bool {
        self.offsets.get(index).is_some_and(|&offset| offset != 0)
    }

    /// Indices of all occupied slots, ascending.
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .filter(|&(_, &offset)| offset != 0)
            .map(|(index, _)| index)
    }

    /// Reads the compressed blob of slot `index`.
    ///
    /// # Errors
    /// Fails with [`StorageError::UpgradeRequired`] when the slot is occupied
    /// but the file predates the current format, since its payload would be
    /// misinterpreted.
    pub fn read(&mut self, index: usize) -> Result<Option<ChunkBlob>> {
        if self.is_upgrade_required() && self.has_chunk(index) {
            return Err(StorageError::UpgradeRequired {
                path: self.path.clone(),
                version: self.version as u8,
            });
        }
        self.read_raw(index)
    }

    /// Reads the blob of slot `index` whatever the file version.
    pub fn read_raw(&mut self, index: usize) -> Result<Option<ChunkBlob>> {
        if index >= REGION_CHUNKS_COUNT {
            return Err(StorageError::InvalidInput(format!(
                "slot index {index} is out of range"
            )));
        }
        let offset = self.offsets[index] as u64;
        if offset == 0 {
            return Ok(None);
        }
        if offset < REGION_HEADER_SIZE as u64
            || offset + ENTRY_HEADER_SIZE as u64 > self.trailer_start
        {
            return Err(StorageError::Corrupted(format!(
                "slot {index} of {:?} points to invalid offset {offset}",
                self.path
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let blob_len = self.file.read_u32::<BigEndian>()? as u64;
        let source_len = self.file.read_u32::<BigEndian>()? as usize;
        if offset + ENTRY_HEADER_SIZE as u64 + blob_len > self.trailer_start {
            return Err(StorageError::Corrupted(format!(
                "slot {index} of {:?} runs past the offset table",
                self.path
            )));
        }

        let mut data = vec![0u8; blob_len as usize];
        self.file.read_exact(&mut data)?;
        Ok(Some(ChunkBlob::new(data, source_len)))
    }

    /// Writes a complete region file in the current format.
    ///
    /// `slots` must hold exactly one entry per region slot. The file is
    /// overwritten in one sequential write; there is no temporary file, so
    /// a crash in the middle of it leaves the region corrupted.
    pub fn write(path: &Path, compression: Method, slots: &[Option<ChunkBlob>]) -> Result<()> {
        Self::write_with_version(path, REGION_FORMAT_VERSION, compression, slots)
    }

    /// Writes a region file stamped with an explicit format version.
    pub fn write_with_version(
        path: &Path,
        version: u32,
        compression: Method,
        slots: &[Option<ChunkBlob>],
    ) -> Result<()> {
        if slots.len() != REGION_CHUNKS_COUNT {
            return Err(StorageError::InvalidInput(format!(
                "a region holds {REGION_CHUNKS_COUNT} slots, got {}",
                slots.len()
            )));
        }
        let version = u8::try_from(version).map_err(|_| {
            StorageError::InvalidInput(format!("region version {version} does not fit a byte"))
        })?;

        let mut builder = ByteBuilder::new();
        builder
            .put_bytes(REGION_MAGIC)
            .put_u8(version)
            .put_u8(compression.tag());

        let mut offsets = vec![0u32; REGION_CHUNKS_COUNT];
        for (index, slot) in slots.iter().enumerate() {
            let Some(blob) = slot else {
                continue;
            };
            offsets[index] = to_u32(builder.len(), "entry offset")?;
            builder
                .put_u32(to_u32(blob.data.len(), "blob length")?)
                .put_u32(to_u32(blob.source_len, "source length")?)
                .put_bytes(&blob.data);
        }
        for offset in offsets {
            builder.put_u32(offset);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, builder.build())?;
        debug!("Wrote region file {:?}", path);
        Ok(())
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::InvalidInput(format!("{what} {value} exceeds the format limit")))
}
