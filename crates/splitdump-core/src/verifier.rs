//! Post-write verification
//!
//! After a part (or a single-file backup) is committed, its bytes are read
//! back from the destination and the matching range is read again from the
//! device. Each chunk is hashed with SHA-256 on both sides and the first 16
//! bytes of the digests are compared.
//!
//! - `Sparse` compares every 4th chunk, starting with the first of each part
//! - `Full` compares every chunk
//! - `FullWithLog` also writes `<file>.sha256sums` with one destination digest
//!   per chunk, so the backup can later be checked without the device

use crate::chunked::{Chunk, RetryPolicy};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::progress::{Level, Phase, ProgressSink, Reporter, TransferProgress};
use crate::region::Region;
use crate::volume::{OpenMode, Volume, VolumeFile};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// Constants
// ============================================================================

/// Sparse mode compares one chunk out of this many
pub const SPARSE_STRIDE: u64 = 4;

/// Leading digest bytes that must match
pub const DIGEST_COMPARE_LEN: usize = 16;

/// Suffix appended to a data file name for its digest log
pub const DIGEST_LOG_SUFFIX: &str = ".sha256sums";

/// Header prefix of a digest log
const DIGEST_LOG_HEADER: &str = "# chunk size: ";

// ============================================================================
// Mode and outcome
// ============================================================================

/// How much of a backup is re-read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyMode {
    /// No verification
    Off,
    /// Every 4th chunk
    #[default]
    Sparse,
    /// Every chunk
    Full,
    /// Every chunk, plus a digest log next to the data file
    FullWithLog,
}

impl VerifyMode {
    /// Whether chunk `index` of a part is compared
    pub fn compares(self, index: u64) -> bool {
        match self {
            VerifyMode::Off => false,
            VerifyMode::Sparse => index % SPARSE_STRIDE == 0,
            VerifyMode::Full | VerifyMode::FullWithLog => true,
        }
    }
}

impl std::str::FromStr for VerifyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "disabled" => Ok(VerifyMode::Off),
            "sparse" | "fast" => Ok(VerifyMode::Sparse),
            "full" => Ok(VerifyMode::Full),
            "full-log" | "full-with-log" | "log" => Ok(VerifyMode::FullWithLog),
            _ => Err(Error::InvalidConfig(format!(
                "Unknown verification mode: {}. Valid options: off, sparse, full, full-log",
                s
            ))),
        }
    }
}

impl std::fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyMode::Off => write!(f, "off"),
            VerifyMode::Sparse => write!(f, "sparse"),
            VerifyMode::Full => write!(f, "full"),
            VerifyMode::FullWithLog => write!(f, "full-log"),
        }
    }
}

/// Result of verifying one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// All compared chunks matched
    Verified {
        /// Chunks compared
        chunks_compared: u64,
    },
    /// Verification was cancelled or disabled; nothing was rolled back
    Skipped,
}

impl VerifyOutcome {
    /// Whether the file was actually checked
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified { .. })
    }
}

/// Where a file's bytes live on the device
#[derive(Debug, Clone, Copy)]
pub struct PartSpan<'a> {
    /// Region the file belongs to
    pub region: &'a Region,
    /// Index of the part (0 for a single file)
    pub part_index: u32,
    /// Device LBA of the file's first byte
    pub lba_start: u32,
    /// Sectors stored in the file
    pub sectors: u64,
}

/// Path of the digest log for `data_path`
pub fn digest_log_path(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_owned();
    name.push(DIGEST_LOG_SUFFIX);
    PathBuf::from(name)
}

// ============================================================================
// Verifier
// ============================================================================

/// Re-reads committed data and compares it with the device
#[derive(Debug)]
pub struct HashVerifier {
    mode: VerifyMode,
    chunk_sectors: u32,
    block_size: u32,
    retry: RetryPolicy,
    device_buf: Vec<u8>,
    file_buf: Vec<u8>,
    retries: u32,
}

impl HashVerifier {
    /// Create a verifier comparing chunks of `chunk_sectors` blocks
    pub fn new(mode: VerifyMode, chunk_sectors: u32, block_size: u32, retry: RetryPolicy) -> Self {
        let chunk_sectors = chunk_sectors.max(1);
        let len = if mode == VerifyMode::Off {
            0
        } else {
            chunk_sectors as usize * block_size as usize
        };
        Self {
            mode,
            chunk_sectors,
            block_size,
            retry,
            device_buf: vec![0u8; len],
            file_buf: vec![0u8; len],
            retries: 0,
        }
    }

    /// Mode in use
    pub fn mode(&self) -> VerifyMode {
        self.mode
    }

    /// Device retries performed while verifying
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Verify the file at `path` against `span` on the device
    ///
    /// `cancel` is polled once per chunk. A cancelled verification is not an
    /// error: the data stays as written and [`VerifyOutcome::Skipped`] is
    /// returned.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_part<D, V, S, C>(
        &mut self,
        device: &mut D,
        volume: &mut V,
        path: &Path,
        span: PartSpan<'_>,
        reporter: &mut Reporter,
        sink: &S,
        cancel: C,
    ) -> Result<VerifyOutcome>
    where
        D: BlockDevice + ?Sized,
        V: Volume + ?Sized,
        S: ProgressSink + ?Sized,
        C: Fn() -> bool,
    {
        if self.mode == VerifyMode::Off {
            return Ok(VerifyOutcome::Skipped);
        }

        let mut file = volume
            .open(path, OpenMode::Read)
            .map_err(|e| Error::filesystem(path, e))?;

        let log_path = digest_log_path(path);
        let mut log = if self.mode == VerifyMode::FullWithLog {
            let mut log = volume
                .open(&log_path, OpenMode::Create)
                .map_err(|e| Error::filesystem(&log_path, e))?;
            writeln!(log, "{}{}", DIGEST_LOG_HEADER, self.chunk_bytes())
                .map_err(|e| Error::filesystem(&log_path, e))?;
            Some(log)
        } else {
            None
        };

        info!(path = %path.display(), mode = %self.mode, "Verifying");

        let block = u64::from(self.block_size);
        let mut done: u64 = 0;
        let mut index: u64 = 0;
        let mut compared: u64 = 0;

        while done < span.sectors {
            if cancel() {
                let text = format!("Verification of {} skipped", path.display());
                warn!("{}", text);
                sink.message(Level::Warn, &text);
                return Ok(VerifyOutcome::Skipped);
            }

            let count = (span.sectors - done).min(u64::from(self.chunk_sectors)) as u32;
            let lba = lba_after(span.lba_start, done)?;

            if self.mode.compares(index) {
                let len = count as usize * self.block_size as usize;
                file.seek(SeekFrom::Start(done * block))
                    .map_err(|e| Error::filesystem(path, e))?;
                file.read_exact(&mut self.file_buf[..len])
                    .map_err(|e| Error::filesystem(path, e))?;

                let chunk = Chunk {
                    area: span.region.area,
                    lba,
                    count,
                };
                self.retries +=
                    self.retry
                        .read_blocks(device, chunk, &mut self.device_buf[..len], sink)?;

                let device_digest = Sha256::digest(&self.device_buf[..len]);
                let file_digest = Sha256::digest(&self.file_buf[..len]);

                if device_digest[..DIGEST_COMPARE_LEN] != file_digest[..DIGEST_COMPARE_LEN] {
                    warn!(path = %path.display(), lba, "Digest mismatch");
                    return Err(Error::VerificationMismatch { lba });
                }

                if let Some(log) = log.as_mut() {
                    writeln!(log, "{}", hex::encode(file_digest))
                        .map_err(|e| Error::filesystem(&log_path, e))?;
                }
                compared += 1;
            }

            done += u64::from(count);
            index += 1;

            let position = lba_after(span.lba_start, done.min(span.sectors - 1))?;
            reporter.update(
                sink,
                TransferProgress {
                    phase: Phase::Verify,
                    region: span.region.name.clone(),
                    part_index: span.part_index,
                    lba_current: position,
                    bytes_written_in_part: done * block,
                    percent: span.region.percent_at(position),
                },
            );
        }

        if let Some(mut log) = log {
            log.sync().map_err(|e| Error::filesystem(&log_path, e))?;
        }

        debug!(path = %path.display(), compared, "Verification passed");
        Ok(VerifyOutcome::Verified {
            chunks_compared: compared,
        })
    }

    fn chunk_bytes(&self) -> u64 {
        u64::from(self.chunk_sectors) * u64::from(self.block_size)
    }
}

fn lba_after(start: u32, sectors: u64) -> Result<u32> {
    u32::try_from(u64::from(start) + sectors)
        .map_err(|_| Error::InvalidRegion(format!("LBA {:#X} + {} overflows", start, sectors)))
}

// ============================================================================
// Digest log check
// ============================================================================

/// Summary of a successful digest log check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestLogReport {
    /// Chunk size recorded in the log
    pub chunk_size: u64,
    /// Chunks whose digests matched
    pub chunks: u64,
}

/// Re-hash `data_path` against its digest log, without a device
pub fn check_digest_log<V: Volume + ?Sized>(volume: &mut V, data_path: &Path) -> Result<DigestLogReport> {
    let log_path = digest_log_path(data_path);
    let malformed = |reason: String| Error::MalformedDigestLog {
        path: log_path.clone(),
        reason,
    };

    let log = volume
        .open(&log_path, OpenMode::Read)
        .map_err(|e| Error::filesystem(&log_path, e))?;
    let mut lines = BufReader::new(log).lines();

    let header = lines
        .next()
        .transpose()
        .map_err(|e| Error::filesystem(&log_path, e))?
        .ok_or_else(|| malformed("empty file".to_string()))?;
    let chunk_size: u64 = header
        .strip_prefix(DIGEST_LOG_HEADER)
        .and_then(|n| n.trim().parse().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| malformed(format!("bad header: {}", header)))?;

    let data_len = volume
        .size(data_path)
        .map_err(|e| Error::filesystem(data_path, e))?;
    let mut data = volume
        .open(data_path, OpenMode::Read)
        .map_err(|e| Error::filesystem(data_path, e))?;

    let expected_chunks = data_len.div_ceil(chunk_size);
    let mut buf = vec![0u8; usize::try_from(chunk_size).map_err(|_| malformed("chunk size too large".into()))?];
    let mut chunks: u64 = 0;

    for line in lines {
        let line = line.map_err(|e| Error::filesystem(&log_path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if chunks >= expected_chunks {
            return Err(malformed(format!(
                "more digests than the {} chunks of the data file",
                expected_chunks
            )));
        }
        let expected = hex::decode(line)
            .map_err(|e| malformed(format!("line {}: {}", chunks + 2, e)))?;

        let len = (data_len - chunks * chunk_size).min(chunk_size) as usize;
        data.read_exact(&mut buf[..len])
            .map_err(|e| Error::filesystem(data_path, e))?;
        let actual = Sha256::digest(&buf[..len]);

        if actual.as_slice() != expected.as_slice() {
            return Err(Error::DigestMismatch {
                path: data_path.to_path_buf(),
                chunk: chunks,
            });
        }
        chunks += 1;
    }

    if chunks != expected_chunks {
        return Err(malformed(format!(
            "{} digests for {} chunks",
            chunks, expected_chunks
        )));
    }

    info!(path = %data_path.display(), chunks, "Digest log matches");
    Ok(DigestLogReport { chunk_size, chunks })
}

// ============================================================================
// UNIT TESTS
// ============================================================================
