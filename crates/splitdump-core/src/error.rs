//! Error types for the splitdump core library

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for transfer operations
#[derive(Error, Debug)]
pub enum Error {
    /// Block device read or write failed after exhausting retries
    #[error("Device fault at LBA {lba:#010X} ({count} blocks): {reason}")]
    DeviceFault {
        /// First LBA of the failing chunk
        lba: u32,
        /// Number of blocks in the failing chunk
        count: u32,
        /// Driver-provided reason
        reason: String,
    },

    /// Destination filesystem operation failed (never retried)
    #[error("Filesystem error on {path}: {source}")]
    Filesystem {
        /// File the operation was acting on
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Destination does not have room for even one part
    #[error(
        "Not enough free space: need {required_sectors} sectors, {free_sectors} free \
         (parts of {part_sectors} sectors)"
    )]
    InsufficientSpace {
        /// Sectors the region needs
        required_sectors: u64,
        /// Sectors free on the destination
        free_sectors: u64,
        /// Sectors in one part
        part_sectors: u64,
    },

    /// Backup size on the destination differs from the region size
    #[error("Size mismatch: region is {expected_sectors} sectors, backup holds {found_sectors}")]
    SizeMismatch {
        /// Sectors in the region
        expected_sectors: u64,
        /// Sectors found on the destination
        found_sectors: u64,
    },

    /// Verification found differing content
    #[error("Verification failed: device and backup differ at LBA {lba:#010X}")]
    VerificationMismatch {
        /// First LBA of the mismatching chunk
        lba: u32,
    },

    /// A data file no longer matches its digest log
    #[error("Digest mismatch in {path} at chunk {chunk}")]
    DigestMismatch {
        /// Data file that was checked
        path: PathBuf,
        /// Index of the first differing chunk
        chunk: u64,
    },

    /// A digest log could not be parsed or does not fit its data file
    #[error("Malformed digest log {path}: {reason}")]
    MalformedDigestLog {
        /// Path of the digest log
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Operator declined a confirmation prompt
    #[error("Aborted by user: {0}")]
    Declined(String),

    /// Resume record could not be written
    #[error("Failed to write resume record {path}: {source}")]
    ResumeRecord {
        /// Path of the resume record
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Resume record is present but unusable
    #[error("Invalid resume record: {0}")]
    InvalidResume(String),

    /// A part file required for restore is missing
    #[error("Backup file not found: {0}")]
    MissingPart(PathBuf),

    /// First part of a split backup is not a whole number of chunks
    #[error("Part file {path} is {size} bytes, not a multiple of {chunk_bytes} bytes")]
    MisalignedPart {
        /// Path of the part file
        path: PathBuf,
        /// Its size in bytes
        size: u64,
        /// Required alignment
        chunk_bytes: u64,
    },

    /// Region bounds are invalid
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error outside a specific file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error raised while acting on `path`
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether the condition may clear up if the same chunk is tried again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DeviceFault { .. })
    }

    /// Whether the operator stopped the operation rather than a fault occurring
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Declined(_))
    }
}

/// Result type alias using the splitdump error type
pub type Result<T> = std::result::Result<T, Error>;
