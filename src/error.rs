//! # Error Module
//!
//! Typed errors for every layer of the storage engine. Codec and region
//! errors are surfaced verbatim by the stores above them; the migration
//! pipeline wraps whatever a single task returned in [`StorageError::TaskFailure`].

use std::path::PathBuf;

use thiserror::Error;

use crate::content::content_report::ContentIssue;
use crate::migration::ConvertMode;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Main error type for world storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    // ========================================
    // I/O and serialization
    // ========================================
    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unserializable JSON document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================
    // Binary format errors
    // ========================================
    /// Bad magic, unsupported version or unknown tag.
    #[error("invalid format in {path:?}: {reason}")]
    Format {
        /// File being read.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The file must be rewritten by an upgrade pass before it can be read.
    #[error("region file {path:?} has version {version} and must be upgraded first")]
    UpgradeRequired {
        /// Region file.
        path: PathBuf,
        /// Version found in its header.
        version: u8,
    },

    /// A read ran past the end of a buffer.
    #[error("buffer underflow: needed {needed} bytes, {available} available")]
    BufferUnderflow {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A decoder produced a different size than was recorded.
    #[error("decompressed size mismatch: expected {expected} bytes, got {actual}")]
    DecompressionMismatch {
        /// Recorded size.
        expected: usize,
        /// Size produced, or reached before decoding stopped.
        actual: usize,
    },

    /// Stored bytes that cannot be decoded.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// An argument or input document the operation cannot accept.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ========================================
    // Struct layout errors
    // ========================================
    /// No field of that name in the layout.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Element index past the end of a field.
    #[error("index {index} is out of range for field '{field}' with {elements} elements")]
    FieldIndexOutOfRange {
        /// Field accessed.
        field: String,
        /// Element requested.
        index: usize,
        /// Elements the field has.
        elements: usize,
    },

    /// Accessor used on a field of another type.
    #[error("field '{field}' has type {actual}, expected {expected}")]
    FieldTypeMismatch {
        /// Field accessed.
        field: String,
        /// Type the accessor works with.
        expected: &'static str,
        /// Type of the field.
        actual: &'static str,
    },

    /// Duplicate names, empty fields or an oversized record.
    #[error("invalid struct layout: {0}")]
    InvalidLayout(String),

    /// A conversion would drop values and data loss is not allowed.
    #[error("conversion would lose data in fields: {}", fields.join(", "))]
    DataLoss {
        /// Incompatible fields.
        fields: Vec<String>,
    },

    // ========================================
    // Storage and migration errors
    // ========================================
    /// The calling thread already holds this region file.
    #[error("region file {0:?} is already in use")]
    FileInUse(PathBuf),

    /// Stored content has no current definition.
    #[error("world references {} content units that are not loaded", .0.len())]
    UnresolvableContent(Vec<ContentIssue>),

    /// A pass was started before an earlier planned pass completed.
    #[error("cannot run {requested:?} before {missing:?}")]
    PhaseOrder {
        /// Pass that was started.
        requested: ConvertMode,
        /// Planned pass that has not completed.
        missing: ConvertMode,
    },

    /// A task panicked; holds the panic message.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// A migration task failed and the pass was stopped.
    #[error("task '{task}' failed: {source}")]
    TaskFailure {
        /// Name of the task.
        task: String,
        /// What the task returned.
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Shortcut for building a [`StorageError::Format`].
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
