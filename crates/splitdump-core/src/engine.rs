//! Dump, restore and verify orchestration
//!
//! [`TransferEngine`] owns a device, a destination volume and a progress sink
//! and runs one transfer at a time through these states:
//!
//! ```text
//! Planning -> SingleFile | MultiPartActive -> Verifying -> Done
//!                                                       -> Failed
//!                                                       -> PartialAwaitingSpace
//! ```
//!
//! Parts are written in order. After each part is closed it is verified, and
//! on a space-constrained destination the index of the next part is persisted
//! before moving on.

use crate::chunked::{Chunk, ChunkedIo, Direction};
use crate::config::EngineConfig;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::naming::{PartNamer, PartNaming};
use crate::planner::{self, is_small_media, part_size_fits_chunks, PlanInput, TransferPlan};
use crate::progress::{
    format_duration, Level, Phase, ProgressSink, Prompt, Reporter, TransferProgress,
};
use crate::region::Region;
use crate::resume::ResumeTracker;
use crate::verifier::{HashVerifier, PartSpan, VerifyMode, VerifyOutcome};
use crate::volume::{part_files_of, OpenMode, Volume, VolumeFile};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine state, observable between and during transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineState {
    /// No transfer has run yet
    Idle,
    /// Computing the transfer plan
    Planning,
    /// Copying a single-file backup
    SingleFile,
    /// Copying one part of a split backup
    MultiPartActive,
    /// Re-reading a committed file
    Verifying,
    /// Last transfer completed
    Done,
    /// Last transfer failed
    Failed,
    /// Last dump stopped because the destination is full
    PartialAwaitingSpace,
}

/// How a successful call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Everything was transferred
    Done,
    /// The destination is full; free space and dump again to continue
    PartialAwaitingSpace {
        /// Parts committed so far, counting earlier runs
        completed_parts: u32,
    },
}

/// Summary of a dump, restore or verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Region the call acted on
    pub region: String,
    /// Data direction (verification reports [`Direction::Dump`])
    pub direction: Direction,
    /// How the call ended
    pub outcome: Outcome,
    /// Wall time
    pub elapsed: Duration,
    /// Sectors copied in this call
    pub sectors_transferred: u64,
    /// Device retries needed
    pub retries: u32,
    /// Files written (dump) or read (restore) in this call
    pub parts_written: u32,
    /// Whether every file handled was verified
    pub verified: bool,
    /// Number of parts in the set, 0 for a single file
    pub part_count: u32,
}

/// A backup found on the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    /// Files in order, with their sizes in bytes
    pub files: Vec<(PathBuf, u64)>,
    /// Whether the files are parts rather than one combined file
    pub split: bool,
}

impl BackupSet {
    /// Combined size in bytes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }
}

struct Cancel {
    flag: Arc<AtomicBool>,
    predicate: Option<Box<dyn Fn() -> bool>>,
}

impl Cancel {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.predicate.as_ref().is_some_and(|p| p())
    }
}

/// Orchestrates dumps, restores and verification passes
pub struct TransferEngine<D, V, S> {
    device: D,
    volume: V,
    sink: S,
    config: EngineConfig,
    namer: PartNamer,
    resume: ResumeTracker,
    cancel: Cancel,
    state: EngineState,
}

impl<D, V, S> TransferEngine<D, V, S>
where
    D: BlockDevice,
    V: Volume,
    S: ProgressSink,
{
    /// Create an engine owning its collaborators
    pub fn new(device: D, volume: V, sink: S, config: EngineConfig) -> Result<Self> {
        config.validate(device.block_size())?;
        Ok(Self {
            namer: PartNamer::new(config.naming),
            device,
            volume,
            sink,
            config,
            resume: ResumeTracker::new(),
            cancel: Cancel {
                flag: Arc::new(AtomicBool::new(false)),
                predicate: None,
            },
            state: EngineState::Idle,
        })
    }

    /// Poll `predicate` once per chunk in addition to the cancel handle
    pub fn with_cancel_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.cancel.predicate = Some(Box::new(predicate));
        self
    }

    /// Keep the resume record somewhere other than the volume root
    pub fn with_resume_tracker(mut self, tracker: ResumeTracker) -> Self {
        self.resume = tracker;
        self
    }

    /// Get a handle to cancel the running operation
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel.flag)
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The destination volume
    pub fn volume(&self) -> &V {
        &self.volume
    }

    /// The destination volume, mutably
    pub fn volume_mut(&mut self) -> &mut V {
        &mut self.volume
    }

    /// Give back the collaborators
    pub fn into_parts(self) -> (D, V, S) {
        (self.device, self.volume, self.sink)
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "State transition");
            self.state = state;
        }
    }

    fn finish(&mut self, result: &Result<TransferReport>) {
        match result {
            Ok(report) => {
                let state = match report.outcome {
                    Outcome::Done => EngineState::Done,
                    Outcome::PartialAwaitingSpace { .. } => EngineState::PartialAwaitingSpace,
                };
                self.set_state(state);
            }
            Err(err) => {
                self.set_state(EngineState::Failed);
                if !err.is_user_abort() {
                    self.sink.message(Level::Error, &err.to_string());
                }
            }
        }
    }

    fn check_region(&self, region: &Region) -> Result<()> {
        let available = self.device.area_sectors(region.area);
        if u64::from(region.lba_end) >= available {
            return Err(Error::InvalidRegion(format!(
                "{} ends at LBA {:#010X} but {} has {} sectors",
                region.name, region.lba_end, region.area, available
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Dump
    // ========================================================================

    /// Back up `region` to `base` (or `base.NN` parts) on the volume
    pub fn dump(&mut self, region: &Region, base: &Path) -> Result<TransferReport> {
        let start = Instant::now();
        self.set_state(EngineState::Planning);
        info!(region = %region, base = %base.display(), "Starting dump");

        let result = self.dump_inner(region, base, start);
        self.finish(&result);
        result
    }

    fn plan_dump(&mut self, region: &Region) -> Result<TransferPlan> {
        let block = self.device.block_size();
        let total_sectors = region.sector_count();
        let free_bytes = self.volume.free_bytes()?;
        let capacity = self.volume.total_bytes()?;

        let resume_index =
            if ResumeTracker::applies(total_sectors, block, self.config.file_size_ceiling) {
                self.resume.load(&mut self.volume)?
            } else {
                None
            };

        planner::plan(&PlanInput {
            total_sectors,
            block_size: block,
            fs_kind: self.volume.kind(),
            file_size_ceiling: self.config.file_size_ceiling,
            chunk_sectors: self.config.chunk_sectors,
            free_sectors: free_bytes / u64::from(block),
            small_media: is_small_media(capacity, self.config.small_media_threshold),
            part_size_override: self.config.part_size,
            resume_index,
        })
    }

    fn dump_inner(&mut self, region: &Region, base: &Path, start: Instant) -> Result<TransferReport> {
        self.check_region(region)?;
        if let Some(dir) = base.parent().filter(|d| !d.as_os_str().is_empty()) {
            self.volume
                .create_dir_all(dir)
                .map_err(|e| Error::filesystem(dir, e))?;
        }

        let plan = self.plan_dump(region)?;
        self.confirm_overwrite(base, &plan)?;

        if plan.resume_from > 0 {
            self.sink.message(
                Level::Info,
                &format!(
                    "Resuming {} at part {} of {}",
                    region.name, plan.resume_from, plan.part_count
                ),
            );
        }

        let block = self.device.block_size();
        let tracked = plan.space_constrained
            && plan.resumable
            && ResumeTracker::applies(plan.total_sectors, block, self.config.file_size_ceiling);
        let mut io = ChunkedIo::new(self.config.chunk_sectors, block, self.config.retry);
        let mut verifier = HashVerifier::new(
            self.config.verify_mode,
            self.config.chunk_sectors,
            block,
            self.config.retry,
        );
        let mut reporter = Reporter::new();

        let mut report = TransferReport {
            region: region.name.clone(),
            direction: Direction::Dump,
            outcome: Outcome::Done,
            elapsed: Duration::ZERO,
            sectors_transferred: 0,
            retries: 0,
            parts_written: 0,
            verified: self.config.verify_mode != VerifyMode::Off,
            part_count: plan.part_count,
        };

        let indices = if plan.is_split() {
            plan.resume_from..plan.part_count
        } else {
            0..1
        };

        for index in indices {
            if plan.must_pause_before(index) {
                report.outcome = Outcome::PartialAwaitingSpace {
                    completed_parts: index,
                };
                let hint = if tracked {
                    "Move the parts off the medium and run the dump again to continue."
                } else {
                    "This dump cannot be resumed; use a medium with more free space."
                };
                self.sink.message(
                    Level::Info,
                    &format!(
                        "Destination full after {} of {} parts of {}. {}",
                        index, plan.part_count, region.name, hint
                    ),
                );
                break;
            }

            let path = self.namer.target_for(base, plan.part_count, index);
            let offset = if plan.is_split() {
                plan.part_offset(index)
            } else {
                0
            };
            let sectors = plan.sectors_in_part(index);
            let lba_start = region.lba_at(offset).ok_or_else(|| {
                Error::InvalidRegion(format!("part {} starts outside {}", index, region.name))
            })?;

            self.set_state(if plan.is_split() {
                EngineState::MultiPartActive
            } else {
                EngineState::SingleFile
            });
            debug!(index, path = %path.display(), lba_start, sectors, "Writing part");

            self.dump_part(&mut io, &mut reporter, region, &path, index, lba_start, sectors, plan.is_split())?;
            report.sectors_transferred += sectors;
            report.parts_written += 1;

            self.set_state(EngineState::Verifying);
            let span = PartSpan {
                region,
                part_index: index,
                lba_start,
                sectors,
            };
            let cancel = &self.cancel;
            let outcome = verifier.verify_part(
                &mut self.device,
                &mut self.volume,
                &path,
                span,
                &mut reporter,
                &self.sink,
                || cancel.is_set(),
            )?;
            if outcome == VerifyOutcome::Skipped {
                report.verified = false;
            }

            let next = index + 1;
            let last = !plan.is_split() || next == plan.part_count;
            if !last && outcome == VerifyOutcome::Skipped && self.cancel.is_set() {
                // Unverified parts never advance the resume record
                self.sink.message(
                    Level::Info,
                    &format!(
                        "Dump of {} stopped; part {} was kept but not verified",
                        region.name, index
                    ),
                );
                return Err(Error::Cancelled);
            }
            if tracked && !last {
                self.resume.save(&mut self.volume, next)?;
            }
        }

        if report.outcome == Outcome::Done {
            if tracked {
                self.resume.clear(&mut self.volume)?;
            }
            if plan.space_constrained {
                self.sink.message(
                    Level::Info,
                    &format!(
                        "{} was split into {} parts. Join them in order to rebuild the image.",
                        region.name, plan.part_count
                    ),
                );
            }
            self.sink.message(
                Level::Info,
                &format!(
                    "Dumped {} in {}",
                    region.name,
                    format_duration(start.elapsed().as_secs())
                ),
            );
        }

        report.retries = io.retries() + verifier.retries();
        report.elapsed = start.elapsed();
        info!(
            region = %region.name,
            parts = report.parts_written,
            sectors = report.sectors_transferred,
            outcome = ?report.outcome,
            "Dump finished"
        );
        Ok(report)
    }

    fn confirm_overwrite(&mut self, base: &Path, plan: &TransferPlan) -> Result<()> {
        let first = self.namer.target_for(base, plan.part_count, plan.resume_from);
        let fresh = plan.resume_from == 0;
        let stale = if fresh {
            part_files_of(&self.volume, base).map_err(|e| Error::filesystem(base, e))?
        } else {
            Vec::new()
        };

        if !self.volume.exists(&first) && stale.is_empty() {
            return Ok(());
        }

        let prompt = Prompt::BackupExists {
            path: first.clone(),
            stale_parts: stale.len(),
        };
        if !self.sink.confirm(&prompt) {
            warn!(path = %first.display(), "Overwrite declined");
            return Err(Error::Declined(format!(
                "{} already exists",
                first.display()
            )));
        }

        let dir = base.parent().unwrap_or_else(|| Path::new(""));
        for name in stale {
            let path = dir.join(&name);
            self.volume
                .unlink(&path)
                .map_err(|e| Error::filesystem(&path, e))?;
            debug!(path = %path.display(), "Removed stale part");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn dump_part(
        &mut self,
        io: &mut ChunkedIo,
        reporter: &mut Reporter,
        region: &Region,
        path: &Path,
        index: u32,
        lba_start: u32,
        sectors: u64,
        split: bool,
    ) -> Result<()> {
        let mut file = self
            .volume
            .open(path, OpenMode::Create)
            .map_err(|e| Error::filesystem(path, e))?;

        let result = self.dump_chunks(&mut file, io, reporter, region, path, index, lba_start, sectors, split);
        drop(file);

        if let Err(err) = &result {
            match self.volume.unlink(path) {
                Ok(()) => debug!(path = %path.display(), "Removed incomplete file"),
                Err(e) => warn!(path = %path.display(), "Could not remove incomplete file: {}", e),
            }
            debug!("Dump of part {} failed: {}", index, err);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn dump_chunks(
        &mut self,
        file: &mut V::File,
        io: &mut ChunkedIo,
        reporter: &mut Reporter,
        region: &Region,
        path: &Path,
        index: u32,
        lba_start: u32,
        sectors: u64,
        split: bool,
    ) -> Result<()> {
        let block = u64::from(self.device.block_size());
        let chunk_sectors = u64::from(io.chunk_sectors());
        let mut done: u64 = 0;
        let mut unsynced: u64 = 0;

        while done < sectors {
            if self.cancel.is_set() {
                return Err(Error::Cancelled);
            }

            let count = (sectors - done).min(chunk_sectors) as u32;
            let chunk = Chunk {
                area: region.area,
                lba: offset_lba(lba_start, done)?,
                count,
            };
            io.copy_chunk(&mut self.device, file, path, Direction::Dump, chunk, &self.sink)?;

            done += u64::from(count);
            unsynced += u64::from(count) * block;
            if !split && unsynced >= self.config.flush_interval {
                file.sync().map_err(|e| Error::filesystem(path, e))?;
                unsynced = 0;
            }

            self.report(reporter, region, Phase::Transfer, index, lba_start, done, block);
        }

        file.sync().map_err(|e| Error::filesystem(path, e))
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        reporter: &mut Reporter,
        region: &Region,
        phase: Phase,
        index: u32,
        lba_start: u32,
        done: u64,
        block: u64,
    ) {
        let position = u64::from(lba_start) + done;
        let lba_current = u32::try_from(position).unwrap_or(u32::MAX).min(region.lba_end);
        let percent = if position > u64::from(region.lba_end) {
            100
        } else {
            region.percent_at(lba_current)
        };
        reporter.update(
            &self.sink,
            TransferProgress {
                phase,
                region: region.name.clone(),
                part_index: index,
                lba_current,
                bytes_written_in_part: done * block,
                percent,
            },
        );
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Write the backup at `base` (or its parts) back to `region`
    pub fn restore(&mut self, region: &Region, base: &Path) -> Result<TransferReport> {
        let start = Instant::now();
        self.set_state(EngineState::Planning);
        info!(region = %region, base = %base.display(), "Starting restore");

        let mut touched = false;
        let result = self.restore_inner(region, base, start, &mut touched);
        if result.is_err() && touched {
            self.sink.message(
                Level::Warn,
                &format!(
                    "Restore of {} did not finish; the device may be in an inconsistent state",
                    region.name
                ),
            );
        }
        self.finish(&result);
        result
    }

    fn restore_inner(
        &mut self,
        region: &Region,
        base: &Path,
        start: Instant,
        touched: &mut bool,
    ) -> Result<TransferReport> {
        if self.config.confirm_restore
            && !self.sink.confirm(&Prompt::DestructiveRestore {
                region: region.name.clone(),
            })
        {
            return Err(Error::Declined(format!("restore of {}", region.name)));
        }
        self.check_region(region)?;

        let block = self.device.block_size();
        let expected_sectors = region.sector_count();
        let set = self.locate_backup(base, expected_sectors * u64::from(block))?;
        let total_sectors = self.resolve_restore_size(&set, expected_sectors)?;

        let part_count = if set.split { set.files.len() as u32 } else { 0 };
        let mut io = ChunkedIo::new(self.config.chunk_sectors, block, self.config.retry);
        let mut verifier = HashVerifier::new(
            self.config.verify_mode,
            self.config.chunk_sectors,
            block,
            self.config.retry,
        );
        let mut reporter = Reporter::new();
        let mut report = TransferReport {
            region: region.name.clone(),
            direction: Direction::Restore,
            outcome: Outcome::Done,
            elapsed: Duration::ZERO,
            sectors_transferred: 0,
            retries: 0,
            parts_written: 0,
            verified: self.config.verify_mode != VerifyMode::Off,
            part_count,
        };

        let mut offset: u64 = 0;
        for (index, (path, size)) in set.files.iter().enumerate() {
            if offset >= total_sectors {
                break;
            }
            let index = index as u32;
            let sectors = (size / u64::from(block)).min(total_sectors - offset);
            let lba_start = offset_lba(region.lba_start, offset)?;

            self.set_state(if set.split {
                EngineState::MultiPartActive
            } else {
                EngineState::SingleFile
            });
            debug!(index, path = %path.display(), lba_start, sectors, "Restoring part");

            let mut file = self
                .volume
                .open(path, OpenMode::Read)
                .map_err(|e| Error::filesystem(path, e))?;
            let chunk_sectors = u64::from(io.chunk_sectors());
            let mut done: u64 = 0;
            while done < sectors {
                if self.cancel.is_set() {
                    return Err(Error::Cancelled);
                }
                let count = (sectors - done).min(chunk_sectors) as u32;
                let chunk = Chunk {
                    area: region.area,
                    lba: offset_lba(lba_start, done)?,
                    count,
                };
                *touched = true;
                io.copy_chunk(
                    &mut self.device,
                    &mut file,
                    path,
                    Direction::Restore,
                    chunk,
                    &self.sink,
                )?;
                done += u64::from(count);
                self.report(
                    &mut reporter,
                    region,
                    Phase::Transfer,
                    index,
                    lba_start,
                    done,
                    u64::from(block),
                );
            }
            drop(file);
            self.device.sync().map_err(|fault| Error::DeviceFault {
                lba: lba_start,
                count: 0,
                reason: fault.0,
            })?;

            report.sectors_transferred += sectors;
            report.parts_written += 1;
            offset += sectors;

            self.set_state(EngineState::Verifying);
            let span = PartSpan {
                region,
                part_index: index,
                lba_start,
                sectors,
            };
            let cancel = &self.cancel;
            let outcome = verifier.verify_part(
                &mut self.device,
                &mut self.volume,
                path,
                span,
                &mut reporter,
                &self.sink,
                || cancel.is_set(),
            )?;
            if outcome == VerifyOutcome::Skipped {
                report.verified = false;
            }
        }

        self.sink.message(
            Level::Info,
            &format!(
                "Restored {} in {}",
                region.name,
                format_duration(start.elapsed().as_secs())
            ),
        );
        report.retries = io.retries() + verifier.retries();
        report.elapsed = start.elapsed();
        info!(
            region = %region.name,
            parts = report.parts_written,
            sectors = report.sectors_transferred,
            "Restore finished"
        );
        Ok(report)
    }

    /// Decide how many sectors to restore, asking when sizes disagree
    fn resolve_restore_size(&mut self, set: &BackupSet, expected_sectors: u64) -> Result<u64> {
        let block = u64::from(self.device.block_size());
        let found_bytes = set.total_bytes();
        let found_sectors = found_bytes / block;

        if found_sectors == expected_sectors && found_bytes % block == 0 {
            return Ok(expected_sectors);
        }

        warn!(
            expected_sectors,
            found_sectors, "Backup size does not match the region"
        );
        let prompt = Prompt::SizeMismatch {
            expected_sectors,
            found_sectors,
        };
        if !self.sink.confirm(&prompt) {
            return Err(Error::SizeMismatch {
                expected_sectors,
                found_sectors,
            });
        }
        if found_sectors == 0 {
            return Err(Error::SizeMismatch {
                expected_sectors,
                found_sectors,
            });
        }
        if found_sectors > expected_sectors {
            self.sink.message(
                Level::Warn,
                &format!(
                    "Backup is larger than the region; only the first {} sectors are restored",
                    expected_sectors
                ),
            );
        }
        Ok(found_sectors.min(expected_sectors))
    }

    /// Find the backup for `base`: the combined file, else its parts
    ///
    /// Parts are collected in order until `expected_bytes` is reached or the
    /// next part is missing.
    pub fn locate_backup(&self, base: &Path, expected_bytes: u64) -> Result<BackupSet> {
        if let Ok(size) = self.volume.size(base) {
            return Ok(BackupSet {
                files: vec![(base.to_path_buf(), size)],
                split: false,
            });
        }
        if !self.config.allow_multipart_restore {
            return Err(Error::MissingPart(base.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut total: u64 = 0;
        let mut index: u32 = 0;
        while total < expected_bytes {
            let Some(path) = self.find_part(base, index) else {
                break;
            };
            let size = self
                .volume
                .size(&path)
                .map_err(|e| Error::filesystem(&path, e))?;
            total += size;
            files.push((path, size));
            index += 1;
        }

        if files.is_empty() {
            return Err(Error::MissingPart(self.namer.name_for(base, 1, 0)));
        }

        let block = u64::from(self.device.block_size());
        let chunk_bytes = u64::from(self.config.chunk_sectors) * block;
        if files.len() > 1 {
            let (first, size) = &files[0];
            if !part_size_fits_chunks(*size, chunk_bytes) {
                return Err(Error::MisalignedPart {
                    path: first.clone(),
                    size: *size,
                    chunk_bytes,
                });
            }
        }
        if let Some((path, size)) = files.iter().find(|(_, size)| size % block != 0) {
            return Err(Error::MisalignedPart {
                path: path.clone(),
                size: *size,
                chunk_bytes: block,
            });
        }

        debug!(parts = files.len(), total, "Located split backup");
        Ok(BackupSet { files, split: true })
    }

    fn find_part(&self, base: &Path, index: u32) -> Option<PathBuf> {
        // Set size is unknown here, so accept either padding convention
        let padded = PartNamer::new(PartNaming::Padded).name_for(base, 0, index);
        let compact = PartNamer::new(PartNaming::Compact).name_for(base, 0, index);
        [self.namer.name_for(base, 0, index), padded, compact]
            .into_iter()
            .find(|p| self.volume.exists(p))
    }

    // ========================================================================
    // Verify only
    // ========================================================================

    /// Compare an existing backup with the device without transferring
    ///
    /// Uses the configured mode, or `Full` when verification is off.
    pub fn verify_backup(&mut self, region: &Region, base: &Path) -> Result<TransferReport> {
        let start = Instant::now();
        self.set_state(EngineState::Planning);
        let result = self.verify_backup_inner(region, base, start);
        self.finish(&result);
        result
    }

    fn verify_backup_inner(&mut self, region: &Region, base: &Path, start: Instant) -> Result<TransferReport> {
        self.check_region(region)?;
        let block = self.device.block_size();
        let expected_sectors = region.sector_count();
        let set = self.locate_backup(base, expected_sectors * u64::from(block))?;
        let found_sectors = set.total_bytes() / u64::from(block);
        if found_sectors != expected_sectors {
            return Err(Error::SizeMismatch {
                expected_sectors,
                found_sectors,
            });
        }

        let mode = match self.config.verify_mode {
            VerifyMode::Off => VerifyMode::Full,
            mode => mode,
        };
        let mut verifier =
            HashVerifier::new(mode, self.config.chunk_sectors, block, self.config.retry);
        let mut reporter = Reporter::new();
        let mut verified = true;
        let mut offset: u64 = 0;

        self.set_state(EngineState::Verifying);
        for (index, (path, size)) in set.files.iter().enumerate() {
            let sectors = size / u64::from(block);
            let span = PartSpan {
                region,
                part_index: index as u32,
                lba_start: offset_lba(region.lba_start, offset)?,
                sectors,
            };
            let cancel = &self.cancel;
            let outcome = verifier.verify_part(
                &mut self.device,
                &mut self.volume,
                path,
                span,
                &mut reporter,
                &self.sink,
                || cancel.is_set(),
            )?;
            if outcome == VerifyOutcome::Skipped {
                verified = false;
                break;
            }
            offset += sectors;
        }

        if verified {
            self.sink
                .message(Level::Info, &format!("{} matches the device", base.display()));
        }
        Ok(TransferReport {
            region: region.name.clone(),
            direction: Direction::Dump,
            outcome: Outcome::Done,
            elapsed: start.elapsed(),
            sectors_transferred: 0,
            retries: verifier.retries(),
            parts_written: 0,
            verified,
            part_count: if set.split { set.files.len() as u32 } else { 0 },
        })
    }
}

fn offset_lba(start: u32, sectors: u64) -> Result<u32> {
    u32::try_from(u64::from(start) + sectors)
        .map_err(|_| Error::InvalidRegion(format!("LBA {:#X} + {} overflows", start, sectors)))
}
