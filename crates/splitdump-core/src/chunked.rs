//! Bounded chunk copies between the device and a part file
//!
//! Every transfer is a sequence of chunks of at most `chunk_sectors` blocks.
//! Device faults are retried on the same chunk; filesystem faults are not.

use crate::device::{Area, BlockDevice};
use crate::error::{Error, Result};
use crate::progress::{Level, ProgressSink};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Default chunk size in blocks (4 MiB of 512-byte sectors)
pub const DEFAULT_CHUNK_SECTORS: u32 = 8192;

/// Default number of extra attempts after a device fault
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default pause between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 150;

/// Which way data moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device to file
    Dump,
    /// File to device
    Restore,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Dump => write!(f, "dump"),
            Direction::Restore => write!(f, "restore"),
        }
    }
}

/// A run of blocks inside one hardware area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Hardware area
    pub area: Area,
    /// First LBA
    pub lba: u32,
    /// Number of blocks
    pub count: u32,
}

/// How device faults are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub attempts: u32,
    /// Pause before each new attempt
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Read `chunk` into `buf`, retrying device faults
    ///
    /// Returns the number of retries that were needed.
    pub fn read_blocks<D, S>(
        &self,
        device: &mut D,
        chunk: Chunk,
        buf: &mut [u8],
        sink: &S,
    ) -> Result<u32>
    where
        D: BlockDevice + ?Sized,
        S: ProgressSink + ?Sized,
    {
        self.run(chunk, "reading", sink, || {
            device.read_blocks(chunk.area, chunk.lba, chunk.count, buf)
        })
    }

    /// Write `buf` to `chunk`, retrying device faults
    pub fn write_blocks<D, S>(&self, device: &mut D, chunk: Chunk, buf: &[u8], sink: &S) -> Result<u32>
    where
        D: BlockDevice + ?Sized,
        S: ProgressSink + ?Sized,
    {
        self.run(chunk, "writing", sink, || {
            device.write_blocks(chunk.area, chunk.lba, chunk.count, buf)
        })
    }

    fn run<S, F>(&self, chunk: Chunk, verb: &str, sink: &S, mut op: F) -> Result<u32>
    where
        S: ProgressSink + ?Sized,
        F: FnMut() -> std::result::Result<(), crate::device::DeviceFault>,
    {
        let mut retries = 0;
        loop {
            match op() {
                Ok(()) => return Ok(retries),
                Err(fault) if retries < self.attempts => {
                    retries += 1;
                    let text = format!(
                        "Error {} {} blocks @ LBA {:08X} ({}), retry {}/{}",
                        verb, chunk.count, chunk.lba, fault, retries, self.attempts
                    );
                    warn!("{}", text);
                    sink.message(Level::Warn, &text);
                    std::thread::sleep(self.delay);
                }
                Err(fault) => {
                    return Err(Error::DeviceFault {
                        lba: chunk.lba,
                        count: chunk.count,
                        reason: fault.0,
                    })
                }
            }
        }
    }
}

/// Chunk copier owning the transfer buffer
#[derive(Debug)]
pub struct ChunkedIo {
    buffer: Vec<u8>,
    chunk_sectors: u32,
    block_size: u32,
    retry: RetryPolicy,
    retries: u32,
}

impl ChunkedIo {
    /// Create a copier for chunks of up to `chunk_sectors` blocks
    pub fn new(chunk_sectors: u32, block_size: u32, retry: RetryPolicy) -> Self {
        let chunk_sectors = chunk_sectors.max(1);
        Self {
            buffer: vec![0u8; chunk_sectors as usize * block_size as usize],
            chunk_sectors,
            block_size,
            retry,
            retries: 0,
        }
    }

    /// Largest chunk in blocks
    pub fn chunk_sectors(&self) -> u32 {
        self.chunk_sectors
    }

    /// Largest chunk in bytes
    pub fn chunk_bytes(&self) -> u64 {
        u64::from(self.chunk_sectors) * u64::from(self.block_size)
    }

    /// Retries performed since creation
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Retry policy in use
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Move exactly `chunk.count` blocks between `device` and `file`
    ///
    /// `path` names the file in error reports.
    pub fn copy_chunk<D, F, S>(
        &mut self,
        device: &mut D,
        file: &mut F,
        path: &Path,
        direction: Direction,
        chunk: Chunk,
        sink: &S,
    ) -> Result<()>
    where
        D: BlockDevice + ?Sized,
        F: Read + Write + ?Sized,
        S: ProgressSink + ?Sized,
    {
        if chunk.count == 0 || chunk.count > self.chunk_sectors {
            return Err(Error::InvalidConfig(format!(
                "chunk of {} blocks outside 1..={}",
                chunk.count, self.chunk_sectors
            )));
        }
        let len = chunk.count as usize * self.block_size as usize;
        let buf = &mut self.buffer[..len];

        match direction {
            Direction::Dump => {
                self.retries += self.retry.read_blocks(device, chunk, buf, sink)?;
                file.write_all(buf)
                    .map_err(|e| Error::filesystem(path, e))?;
            }
            Direction::Restore => {
                file.read_exact(buf)
                    .map_err(|e| Error::filesystem(path, e))?;
                self.retries += self.retry.write_blocks(device, chunk, buf, sink)?;
            }
        }

        debug!(
            %direction,
            area = %chunk.area,
            lba = chunk.lba,
            count = chunk.count,
            "Chunk copied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MockProgressSink;
    use crate::testing::{pattern, MemDevice};
    use std::io::Cursor;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        }
    }

    fn quiet_sink() -> MockProgressSink {
        let mut sink = MockProgressSink::new();
        sink.expect_message().return_const(());
        sink
    }

    fn chunk(lba: u32, count: u32) -> Chunk {
        Chunk {
            area: Area::UserData,
            lba,
            count,
        }
    }

    #[test]
    fn test_dump_chunk_copies_bytes() {
        let mut device = MemDevice::with_data(pattern(64 * 512));
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let mut file = Cursor::new(Vec::new());

        io.copy_chunk(
            &mut device,
            &mut file,
            Path::new("out"),
            Direction::Dump,
            chunk(16, 16),
            &quiet_sink(),
        )
        .unwrap();

        assert_eq!(file.into_inner(), pattern(64 * 512)[16 * 512..32 * 512].to_vec());
    }

    #[test]
    fn test_restore_chunk_writes_device() {
        let mut device = MemDevice::new(64);
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let data = pattern(8 * 512);
        let mut file = Cursor::new(data.clone());

        io.copy_chunk(
            &mut device,
            &mut file,
            Path::new("in"),
            Direction::Restore,
            chunk(8, 8),
            &quiet_sink(),
        )
        .unwrap();

        assert_eq!(&device.area_data(Area::UserData)[8 * 512..16 * 512], &data[..]);
        assert_eq!(device.write_count(), 1);
    }

    #[test]
    fn test_short_file_is_filesystem_fault() {
        let mut device = MemDevice::new(64);
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let mut file = Cursor::new(vec![0u8; 100]);

        let err = io
            .copy_chunk(
                &mut device,
                &mut file,
                Path::new("short"),
                Direction::Restore,
                chunk(0, 1),
                &quiet_sink(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Filesystem { .. }));
        assert_eq!(device.write_count(), 0);
    }

    #[test]
    fn test_three_faults_recovered() {
        let mut device = MemDevice::with_data(pattern(32 * 512));
        device.fail_reads_at(0, 3);
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let mut file = Cursor::new(Vec::new());

        let mut sink = MockProgressSink::new();
        sink.expect_message()
            .withf(|level, text| *level == Level::Warn && text.contains("retry"))
            .times(3)
            .return_const(());

        io.copy_chunk(
            &mut device,
            &mut file,
            Path::new("out"),
            Direction::Dump,
            chunk(0, 16),
            &sink,
        )
        .unwrap();
        assert_eq!(io.retries(), 3);
        assert_eq!(file.into_inner().len(), 16 * 512);
    }

    #[test]
    fn test_fourth_fault_is_fatal() {
        let mut device = MemDevice::with_data(pattern(32 * 512));
        device.fail_reads_at(16, 4);
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let mut file = Cursor::new(Vec::new());

        let err = io
            .copy_chunk(
                &mut device,
                &mut file,
                Path::new("out"),
                Direction::Dump,
                chunk(16, 16),
                &quiet_sink(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::DeviceFault { lba: 16, count: 16, .. }));
        assert!(file.into_inner().is_empty());
    }

    #[test]
    fn test_write_faults_retried() {
        let mut device = MemDevice::new(32);
        device.fail_writes_at(0, 2);
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let mut file = Cursor::new(vec![0xAA; 16 * 512]);

        io.copy_chunk(
            &mut device,
            &mut file,
            Path::new("in"),
            Direction::Restore,
            chunk(0, 16),
            &quiet_sink(),
        )
        .unwrap();
        assert_eq!(io.retries(), 2);
        assert_eq!(device.area_data(Area::UserData)[0], 0xAA);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let mut device = MemDevice::new(64);
        let mut io = ChunkedIo::new(16, 512, fast_retry());
        let mut file = Cursor::new(Vec::new());
        let sink = MockProgressSink::new();

        let result = io.copy_chunk(
            &mut device,
            &mut file,
            Path::new("out"),
            Direction::Dump,
            chunk(0, 17),
            &sink,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_chunk_bytes() {
        let io = ChunkedIo::new(DEFAULT_CHUNK_SECTORS, 512, RetryPolicy::default());
        assert_eq!(io.chunk_bytes(), 4 * 1024 * 1024);
        assert_eq!(io.retry_policy().delay, Duration::from_millis(150));
    }
}
