//! Runtime configuration for the transfer engine

use crate::chunked::{RetryPolicy, DEFAULT_CHUNK_SECTORS};
use crate::error::{Error, Result};
use crate::naming::PartNaming;
use crate::planner::{part_size_fits_chunks, SMALL_FILE_CEILING, SMALL_MEDIA_THRESHOLD};
use crate::verifier::VerifyMode;
use std::time::Duration;

/// Single-file dumps are synced every this many bytes (2 GiB)
pub const DEFAULT_FLUSH_INTERVAL: u64 = 2 * 1024 * 1024 * 1024;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Blocks per chunk
    pub chunk_sectors: u32,

    /// Part size replacing the capacity-based default
    pub part_size: Option<u64>,

    /// Device fault retry policy
    pub retry: RetryPolicy,

    /// How much of each part is re-read
    pub verify_mode: VerifyMode,

    /// Part file index format
    pub naming: PartNaming,

    /// Largest file the destination accepts when it is small-file limited
    pub file_size_ceiling: u64,

    /// Destinations at or below this capacity get smaller parts
    pub small_media_threshold: u64,

    /// Bytes between syncs of a single-file dump
    pub flush_interval: u64,

    /// Ask before overwriting the device on restore
    pub confirm_restore: bool,

    /// Accept split backups as restore input
    pub allow_multipart_restore: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_sectors: DEFAULT_CHUNK_SECTORS,
            part_size: None,
            retry: RetryPolicy::default(),
            verify_mode: VerifyMode::default(),
            naming: PartNaming::default(),
            file_size_ceiling: SMALL_FILE_CEILING,
            small_media_threshold: SMALL_MEDIA_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            confirm_restore: true,
            allow_multipart_restore: true,
        }
    }
}

impl EngineConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size in blocks
    pub fn chunk_sectors(mut self, sectors: u32) -> Self {
        self.chunk_sectors = sectors;
        self
    }

    /// Set a fixed part size in bytes
    pub fn part_size(mut self, bytes: Option<u64>) -> Self {
        self.part_size = bytes;
        self
    }

    /// Set retry attempts
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    /// Set retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    /// Set verification mode
    pub fn verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    /// Set part naming
    pub fn naming(mut self, naming: PartNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Set the single-file ceiling
    pub fn file_size_ceiling(mut self, bytes: u64) -> Self {
        self.file_size_ceiling = bytes;
        self
    }

    /// Set the small-media threshold
    pub fn small_media_threshold(mut self, bytes: u64) -> Self {
        self.small_media_threshold = bytes;
        self
    }

    /// Set the single-file sync interval
    pub fn flush_interval(mut self, bytes: u64) -> Self {
        self.flush_interval = bytes;
        self
    }

    /// Set whether restore asks before writing
    pub fn confirm_restore(mut self, confirm: bool) -> Self {
        self.confirm_restore = confirm;
        self
    }

    /// Set whether split backups can be restored
    pub fn allow_multipart_restore(mut self, allow: bool) -> Self {
        self.allow_multipart_restore = allow;
        self
    }

    /// Check values that would make a transfer impossible
    pub fn validate(&self, block_size: u32) -> Result<()> {
        if self.chunk_sectors == 0 {
            return Err(Error::InvalidConfig("chunk size must be non-zero".to_string()));
        }
        if let Some(part) = self.part_size {
            if part == 0 || part % u64::from(block_size.max(1)) != 0 {
                return Err(Error::InvalidConfig(format!(
                    "part size {} is not a multiple of the {} byte block size",
                    part, block_size
                )));
            }
            let chunk_bytes = u64::from(self.chunk_sectors) * u64::from(block_size);
            if !part_size_fits_chunks(part, chunk_bytes) {
                return Err(Error::InvalidConfig(format!(
                    "part size {} is not a multiple of the {} byte chunk size",
                    part, chunk_bytes
                )));
            }
        }
        if self.file_size_ceiling < u64::from(block_size) {
            return Err(Error::InvalidConfig(
                "file size ceiling is smaller than one block".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_sectors, 8192);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(150));
        assert_eq!(config.verify_mode, VerifyMode::Sparse);
        assert_eq!(config.naming, PartNaming::Padded);
        assert_eq!(config.file_size_ceiling, 0xFFFF_FFFF);
        assert_eq!(config.flush_interval, 2 * 1024 * 1024 * 1024);
        assert!(config.confirm_restore);
        assert!(config.allow_multipart_restore);
        assert!(config.part_size.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .chunk_sectors(64)
            .part_size(Some(1 << 20))
            .retry_attempts(5)
            .retry_delay(Duration::ZERO)
            .verify_mode(VerifyMode::Full)
            .naming(PartNaming::Compact)
            .confirm_restore(false);

        assert_eq!(config.chunk_sectors, 64);
        assert_eq!(config.part_size, Some(1 << 20));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.verify_mode, VerifyMode::Full);
        assert_eq!(config.naming, PartNaming::Compact);
        assert!(!config.confirm_restore);
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::default().validate(512).is_ok());
        assert!(EngineConfig::new().chunk_sectors(0).validate(512).is_err());
        assert!(EngineConfig::new()
            .part_size(Some(1000))
            .validate(512)
            .is_err());
        assert!(EngineConfig::new()
            .file_size_ceiling(100)
            .validate(512)
            .is_err());
    }

    #[test]
    fn test_validate_part_size_against_chunks() {
        let config = EngineConfig::new().chunk_sectors(64);
        assert!(config.clone().part_size(Some(1000 * 512)).validate(512).is_err());
        assert!(config.clone().part_size(Some(1024 * 512)).validate(512).is_ok());
        assert!(config.part_size(Some(16 * 512)).validate(512).is_ok());
    }
}
