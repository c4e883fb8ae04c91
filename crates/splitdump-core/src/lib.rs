//! # Splitdump Core
//!
//! Core library for backing up and restoring the hardware areas and
//! partitions of a block device to a possibly small, possibly FAT32 volume.
//!
//! ## Modules
//!
//! - `device`: Block device and partition table seams
//! - `region`: Named LBA ranges and how they are selected
//! - `planner`: Single file or split parts, and how many fit
//! - `naming`: Part file names
//! - `resume`: Persistent next-part index for multi-session dumps
//! - `chunked`: Bounded chunk copies with device fault retries
//! - `verifier`: Post-write SHA-256 verification and digest logs
//! - `engine`: Dump, restore and verify orchestration
//! - `progress`: Progress, messages and confirmations
//! - `volume`: Destination filesystem seam
//! - `error`: Error types and result aliases
//! - `config`: Runtime configuration
//! - `settings`: Persistent user settings from configuration file
//! - `testing`: In-memory device and volume (`testing` feature)
//!
//! ## Example
//!
//! ```ignore
//! use splitdump_core::{EngineConfig, Region, TracingSink, TransferEngine};
//! use std::path::Path;
//!
//! let region = Region::boot(0, device.area_sectors(Area::Boot0))?;
//! let mut engine = TransferEngine::new(device, volume, TracingSink::new(true), EngineConfig::new())?;
//!
//! let report = engine.dump(&region, Path::new("backup/BOOT0"))?;
//! println!("{} sectors in {:?}", report.sectors_transferred, report.elapsed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunked;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod naming;
pub mod planner;
pub mod progress;
pub mod region;
pub mod resume;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod verifier;
pub mod volume;

pub use chunked::{
    Chunk, ChunkedIo, Direction, RetryPolicy, DEFAULT_CHUNK_SECTORS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS,
};
pub use config::{EngineConfig, DEFAULT_FLUSH_INTERVAL};
pub use device::{Area, BlockDevice, DeviceFault, RegionSource, SECTOR_SIZE};
pub use engine::{BackupSet, EngineState, Outcome, TransferEngine, TransferReport};
pub use error::{Error, Result};
pub use naming::{PartNamer, PartNaming};
pub use planner::{
    is_small_media, part_size_fits_chunks, plan, FsKind, PlanInput, TransferPlan,
    DEFAULT_PART_SIZE, SMALL_FILE_CEILING, SMALL_MEDIA_PART_SIZE, SMALL_MEDIA_THRESHOLD,
};
pub use progress::{
    format_duration, Level, Phase, ProgressSink, Prompt, Reporter, TracingSink, TransferProgress,
};
pub use region::{Region, RegionSelector, RAW_REGION_NAME, USER_PARTITION_NAME};
pub use resume::{ResumeTracker, RESUME_FILE_NAME};
pub use settings::{
    parse_size, BehaviorSettings, RetrySettings, Settings, SettingsError, TransferSettings,
};
pub use verifier::{
    check_digest_log, digest_log_path, DigestLogReport, HashVerifier, PartSpan, VerifyMode,
    VerifyOutcome, DIGEST_COMPARE_LEN, DIGEST_LOG_SUFFIX, SPARSE_STRIDE,
};
pub use volume::{part_files_of, OpenMode, Volume, VolumeFile};
