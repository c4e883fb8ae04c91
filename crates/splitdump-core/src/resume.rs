//! Resume record for split dumps
//!
//! When a split dump stops because the destination is full (or the operator
//! pulls the plug), the index of the next part to write is kept in a 4-byte
//! little-endian record, `partial.idx`, at the destination root. The next dump
//! of the same region picks up from that part once the operator has moved the
//! finished parts off the medium.

use crate::error::{Error, Result};
use crate::volume::{OpenMode, Volume, VolumeFile};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the resume record
pub const RESUME_FILE_NAME: &str = "partial.idx";

/// Size of the record on disk
const RECORD_LEN: usize = 4;

/// Loads, saves and clears the resume record on a volume
#[derive(Debug, Clone)]
pub struct ResumeTracker {
    path: PathBuf,
}

impl Default for ResumeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumeTracker {
    /// Tracker for the record at the volume root
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(RESUME_FILE_NAME),
        }
    }

    /// Tracker for a record inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(RESUME_FILE_NAME),
        }
    }

    /// Location of the record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a transfer of this size is tracked at all
    ///
    /// Only regions that cannot go into one file are ever resumed.
    pub fn applies(total_sectors: u64, block_size: u32, file_size_ceiling: u64) -> bool {
        total_sectors > file_size_ceiling / u64::from(block_size.max(1))
    }

    /// Read the stored index, if a record exists
    pub fn load<V: Volume + ?Sized>(&self, volume: &mut V) -> Result<Option<u32>> {
        if !volume.exists(&self.path) {
            return Ok(None);
        }

        let mut file = volume
            .open(&self.path, OpenMode::Read)
            .map_err(|e| Error::filesystem(&self.path, e))?;
        let mut bytes = Vec::with_capacity(RECORD_LEN);
        file.read_to_end(&mut bytes)
            .map_err(|e| Error::filesystem(&self.path, e))?;

        let record: [u8; RECORD_LEN] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidResume(format!(
                "{} is {} bytes, expected {}",
                self.path.display(),
                bytes.len(),
                RECORD_LEN
            ))
        })?;

        let index = u32::from_le_bytes(record);
        info!(index, path = %self.path.display(), "Loaded resume record");
        Ok(Some(index))
    }

    /// Persist `index` as the next part to write, synced before returning
    pub fn save<V: Volume + ?Sized>(&self, volume: &mut V, index: u32) -> Result<()> {
        let record_err = |source| Error::ResumeRecord {
            path: self.path.clone(),
            source,
        };

        let mut file = volume
            .open(&self.path, OpenMode::Create)
            .map_err(record_err)?;
        file.write_all(&index.to_le_bytes()).map_err(record_err)?;
        file.sync().map_err(record_err)?;

        debug!(index, "Saved resume record");
        Ok(())
    }

    /// Remove the record; a missing record is not an error
    pub fn clear<V: Volume + ?Sized>(&self, volume: &mut V) -> Result<()> {
        if volume.exists(&self.path) {
            volume
                .unlink(&self.path)
                .map_err(|e| Error::filesystem(&self.path, e))?;
            debug!(path = %self.path.display(), "Cleared resume record");
        }
        Ok(())
    }
}
