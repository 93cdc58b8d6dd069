//! Error taxonomy for the storage and synchronization engine.
//!
//! Every fallible operation in this crate returns [`StoreError`]. Decoding
//! failures and garbage collection failures are designed to be tolerated by
//! callers (see the propagation policy on each component): one corrupt file
//! must never prevent reading another.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for storage engine operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file or directory was missing when required.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// A log, pack, or snapshot header could not be parsed.
    #[error("corrupt header in '{path}': {message}")]
    CorruptHeader {
        /// Path of the offending file.
        path: PathBuf,
        /// Description of what was malformed.
        message: String,
    },

    /// A log record, pack entry, or snapshot body failed to decode.
    #[error("corrupt record in '{path}': {message}")]
    CorruptRecord {
        /// Path of the offending file.
        path: PathBuf,
        /// Description of what was malformed.
        message: String,
    },

    /// The container's format version is not supported by this decoder.
    #[error("unsupported format version {found} in '{path}' (expected {expected})")]
    FormatVersion {
        /// Path of the offending file.
        path: PathBuf,
        /// Version found in the container.
        found: u32,
        /// Version this decoder supports.
        expected: u32,
    },

    /// Pack validation: `startSeq < 0` or `endSeq < startSeq`.
    #[error("invalid sequence range {start_seq}..={end_seq}")]
    InvalidRange {
        /// Claimed start sequence.
        start_seq: i64,
        /// Claimed end sequence.
        end_seq: i64,
    },

    /// Pack validation: entry count doesn't match `endSeq - startSeq + 1`.
    #[error("pack entry count mismatch: expected {expected}, found {found}")]
    CountMismatch {
        /// Expected entry count from the declared range.
        expected: usize,
        /// Actual number of entries present.
        found: usize,
    },

    /// Pack validation: an entry's sequence doesn't match `startSeq + index`.
    #[error("pack entries non-contiguous at index {index}: expected sequence {expected}, found {found}")]
    NonContiguous {
        /// Index of the first offending entry.
        index: usize,
        /// Sequence that was expected at this index.
        expected: i64,
        /// Sequence actually present.
        found: i64,
    },

    /// The same (instance, document, sequence) was written twice.
    #[error("sequence collision for instance '{instance_id}' document '{document_id}' sequence {sequence}")]
    SequenceCollision {
        /// Instance that produced the collision.
        instance_id: String,
        /// Document the sequence belongs to.
        document_id: String,
        /// Colliding sequence number.
        sequence: i64,
    },

    /// The log writer has already finalized (written a termination sentinel).
    #[error("log writer for '{0}' has already been finalized")]
    Finalized(PathBuf),

    /// Another live process holds the profile lock.
    #[error("profile lock held by pid {pid}")]
    LockHeld {
        /// PID of the process holding the lock.
        pid: u32,
    },

    /// Underlying filesystem failure.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    /// JSON (de)serialization failure, used by snapshot/pack containers and
    /// the profile/lock JSON files.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reserved for future cancellation support; no operation in this core
    /// currently produces it.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias for storage engine operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A serializable representation of [`StoreError`], for boundary logging and
/// for surfacing structured errors out of the engine (e.g. to an IPC layer).
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
    /// Associated path, if applicable.
    pub path: Option<PathBuf>,
}

impl From<&StoreError> for SerializableError {
    fn from(err: &StoreError) -> Self {
        let kind = match err {
            StoreError::NotFound(_) => "NotFound",
            StoreError::CorruptHeader { .. } => "CorruptHeader",
            StoreError::CorruptRecord { .. } => "CorruptRecord",
            StoreError::FormatVersion { .. } => "FormatVersion",
            StoreError::InvalidRange { .. } => "InvalidRange",
            StoreError::CountMismatch { .. } => "CountMismatch",
            StoreError::NonContiguous { .. } => "NonContiguous",
            StoreError::SequenceCollision { .. } => "SequenceCollision",
            StoreError::Finalized(_) => "Finalized",
            StoreError::LockHeld { .. } => "LockHeld",
            StoreError::IOError(_) => "IOError",
            StoreError::Json(_) => "Json",
            StoreError::Cancelled => "Cancelled",
        }
        .to_string();

        let path = match err {
            StoreError::NotFound(path) => Some(path.clone()),
            StoreError::CorruptHeader { path, .. } => Some(path.clone()),
            StoreError::CorruptRecord { path, .. } => Some(path.clone()),
            StoreError::FormatVersion { path, .. } => Some(path.clone()),
            StoreError::Finalized(path) => Some(path.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<StoreError> for SerializableError {
    fn from(err: StoreError) -> Self {
        SerializableError::from(&err)
    }
}

impl StoreError {
    /// Convert to a serializable representation, e.g. for structured logging.
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}
