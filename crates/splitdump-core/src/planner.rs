//! Split planning
//!
//! Decides, once per transfer, whether a region goes into a single file or a
//! numbered set of part files, how large each part is and how many parts the
//! destination can hold right now. Planning is a pure function of
//! [`PlanInput`] so it can be exercised without any device or volume.
//!
//! When the free space cannot hold even one part of the default size, the
//! planner shrinks the part to the largest size that fits. Such plans are not
//! resumable, since a later run with more free space would pick another size.

use crate::chunked::DEFAULT_CHUNK_SECTORS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Largest single file a FAT32-style filesystem can hold
pub const SMALL_FILE_CEILING: u64 = 0xFFFF_FFFF;

/// Part size used on ordinary media (2 GiB)
pub const DEFAULT_PART_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Part size used on small media (1 GiB)
pub const SMALL_MEDIA_PART_SIZE: u64 = 1024 * 1024 * 1024;

/// Media at or below this capacity use [`SMALL_MEDIA_PART_SIZE`] (8 GiB)
pub const SMALL_MEDIA_THRESHOLD: u64 = 8 * 1024 * 1024 * 1024;

/// Destination filesystem class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsKind {
    /// Files are capped at a size ceiling (FAT32)
    SmallFileLimited,
    /// No practical per-file cap (exFAT and friends)
    LargeFileCapable,
}

impl std::fmt::Display for FsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsKind::SmallFileLimited => write!(f, "small-file-limited"),
            FsKind::LargeFileCapable => write!(f, "large-file-capable"),
        }
    }
}

impl std::str::FromStr for FsKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fat32" | "fat" | "vfat" | "small-file-limited" => Ok(FsKind::SmallFileLimited),
            "exfat" | "ntfs" | "ext4" | "large-file-capable" => Ok(FsKind::LargeFileCapable),
            _ => Err(Error::InvalidConfig(format!(
                "Unknown filesystem kind: {}. Valid options: fat32, exfat",
                s
            ))),
        }
    }
}

/// Everything the planner needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInput {
    /// Sectors in the region being transferred
    pub total_sectors: u64,
    /// Device block size in bytes
    pub block_size: u32,
    /// Destination filesystem class
    pub fs_kind: FsKind,
    /// Largest file the destination accepts
    pub file_size_ceiling: u64,
    /// Blocks per transfer chunk
    pub chunk_sectors: u32,
    /// Sectors currently free on the destination
    pub free_sectors: u64,
    /// Whether the destination counts as small media
    pub small_media: bool,
    /// Part size to use instead of the capacity-based default
    pub part_size_override: Option<u64>,
    /// Index from a resume record, if one was loaded
    pub resume_index: Option<u32>,
}

impl PlanInput {
    /// Input for a region of `total_sectors` with default limits
    pub fn new(total_sectors: u64, block_size: u32, fs_kind: FsKind, free_sectors: u64) -> Self {
        Self {
            total_sectors,
            block_size,
            fs_kind,
            file_size_ceiling: SMALL_FILE_CEILING,
            chunk_sectors: DEFAULT_CHUNK_SECTORS,
            free_sectors,
            small_media: false,
            part_size_override: None,
            resume_index: None,
        }
    }
}

/// The outcome of planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferPlan {
    /// Sectors in the region
    pub total_sectors: u64,
    /// Bytes per part (multiple of the block size)
    pub part_size_bytes: u64,
    /// Sectors per part
    pub part_sectors: u64,
    /// Number of parts; 0 means a single file
    pub part_count: u32,
    /// Parts the destination can hold, counting already committed ones
    pub max_fitting_parts: u32,
    /// Region does not fit the free space (or a resume is in progress)
    pub space_constrained: bool,
    /// First part still to be written
    pub resume_from: u32,
    /// Part size is the fixed one, so a later run plans the same boundaries
    pub resumable: bool,
}

impl TransferPlan {
    /// Whether the transfer produces part files
    pub fn is_split(&self) -> bool {
        self.part_count > 0
    }

    /// Sector offset (from the region start) where part `index` begins
    pub fn part_offset(&self, index: u32) -> u64 {
        u64::from(index) * self.part_sectors
    }

    /// Sectors stored in part `index`; the last part may be short
    pub fn sectors_in_part(&self, index: u32) -> u64 {
        if !self.is_split() {
            return self.total_sectors;
        }
        self.total_sectors
            .saturating_sub(self.part_offset(index))
            .min(self.part_sectors)
    }

    /// Whether writing part `index` must wait for the operator to free space
    pub fn must_pause_before(&self, index: u32) -> bool {
        self.space_constrained && index >= self.max_fitting_parts && index < self.part_count
    }
}

/// Whether parts of `part_bytes` can be read back in whole chunks
///
/// A part either holds whole chunks or is no larger than one chunk.
pub fn part_size_fits_chunks(part_bytes: u64, chunk_bytes: u64) -> bool {
    chunk_bytes == 0 || part_bytes <= chunk_bytes || part_bytes % chunk_bytes == 0
}

/// Plan a transfer
pub fn plan(input: &PlanInput) -> Result<TransferPlan> {
    if input.block_size == 0 {
        return Err(Error::InvalidConfig("block size must be non-zero".to_string()));
    }
    if input.total_sectors == 0 {
        return Err(Error::InvalidConfig("nothing to transfer".to_string()));
    }

    let block = u64::from(input.block_size);
    let chunk_sectors = u64::from(input.chunk_sectors.max(1));
    let fixed_bytes = match input.part_size_override {
        Some(size) if size == 0 || size % block != 0 => {
            return Err(Error::InvalidConfig(format!(
                "part size {} is not a non-zero multiple of the {} byte block size",
                size, block
            )));
        }
        Some(size) if !part_size_fits_chunks(size, chunk_sectors * block) => {
            return Err(Error::InvalidConfig(format!(
                "part size {} is not a multiple of the {} byte chunk size",
                size,
                chunk_sectors * block
            )));
        }
        Some(size) => size,
        None if input.small_media => SMALL_MEDIA_PART_SIZE,
        None => DEFAULT_PART_SIZE,
    };

    let total_bytes = input.total_sectors * block;
    let over_ceiling =
        input.fs_kind == FsKind::SmallFileLimited && total_bytes > input.file_size_ceiling;
    let mut space_constrained = input.total_sectors > input.free_sectors;
    let resuming = input.resume_index.is_some_and(|index| index > 0);

    let mut part_sectors = fixed_bytes / block;
    let mut resumable = true;
    if space_constrained
        && !resuming
        && input.part_size_override.is_none()
        && input.free_sectors < part_sectors
    {
        let limit = if input.fs_kind == FsKind::SmallFileLimited {
            input.free_sectors.min(input.file_size_ceiling / block)
        } else {
            input.free_sectors
        };
        let shrunk = if limit >= chunk_sectors {
            limit - limit % chunk_sectors
        } else {
            limit
        };
        if shrunk > 0 {
            info!(
                default_sectors = part_sectors,
                part_sectors = shrunk,
                "Default part size does not fit, using smaller parts"
            );
            part_sectors = shrunk;
            resumable = false;
        }
    }
    let part_size_bytes = part_sectors * block;

    let mut max_fitting_parts = clamp_u32(input.free_sectors / part_sectors);
    let required = || Error::InsufficientSpace {
        required_sectors: input.total_sectors,
        free_sectors: input.free_sectors,
        part_sectors,
    };

    if space_constrained && max_fitting_parts == 0 {
        return Err(required());
    }

    let resume_from = match input.resume_index {
        Some(index) if index > 0 => {
            space_constrained = true;
            if max_fitting_parts == 0 {
                return Err(required());
            }
            max_fitting_parts = max_fitting_parts.saturating_add(index);
            index
        }
        _ => 0,
    };

    let part_count = if over_ceiling || space_constrained {
        clamp_u32(input.total_sectors.div_ceil(part_sectors))
    } else {
        0
    };

    if resume_from > 0 && resume_from >= part_count {
        return Err(Error::InvalidResume(format!(
            "record points at part {} but the region only has {} parts",
            resume_from, part_count
        )));
    }

    let plan = TransferPlan {
        total_sectors: input.total_sectors,
        part_size_bytes,
        part_sectors,
        part_count,
        max_fitting_parts,
        space_constrained,
        resume_from,
        resumable,
    };

    info!(
        total_sectors = plan.total_sectors,
        part_count = plan.part_count,
        part_size = plan.part_size_bytes,
        max_fitting_parts = plan.max_fitting_parts,
        constrained = plan.space_constrained,
        resume_from = plan.resume_from,
        "Planned transfer"
    );

    Ok(plan)
}

/// Whether a destination of `total_bytes` capacity counts as small media
pub fn is_small_media(total_bytes: u64, threshold: u64) -> bool {
    total_bytes <= threshold
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
