//! Persistent user settings for splitdump
//!
//! Settings are stored in a TOML configuration file at:
//! - Linux: `~/.config/splitdump/splitdump.toml`
//! - macOS: `~/Library/Application Support/splitdump/splitdump.toml`
//! - Windows: `%APPDATA%\splitdump\splitdump.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [transfer]
//! chunk_size = "4M"
//! part_size = "1G"
//! verification = "sparse"
//! naming = "padded"
//!
//! [retry]
//! attempts = 3
//! delay_ms = 150
//!
//! [behavior]
//! skip_confirmation = false
//! quiet = false
//! ```

use crate::chunked::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use crate::config::EngineConfig;
use crate::device::SECTOR_SIZE;
use crate::naming::PartNaming;
use crate::verifier::VerifyMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "splitdump.toml";

/// Application name for config directory
const APP_NAME: &str = "splitdump";

/// Default chunk size string
const DEFAULT_CHUNK_SIZE_STR: &str = "4M";

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Transfer settings
    pub transfer: TransferSettings,

    /// Device fault retry settings
    pub retry: RetrySettings,

    /// Behavior settings
    pub behavior: BehaviorSettings,
}

/// Settings for dump and restore transfers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferSettings {
    /// Chunk size (e.g., "4M", "512K")
    pub chunk_size: String,

    /// Fixed part size (e.g., "1G"); capacity-based when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<String>,

    /// Verification mode (off, sparse, full, full-log)
    pub verification: String,

    /// Part naming (padded, compact)
    pub naming: String,
}

/// Settings for device fault retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Extra attempts after a failed chunk
    pub attempts: u32,

    /// Pause between attempts in milliseconds
    pub delay_ms: u64,
}

/// General behavior settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorSettings {
    /// Whether to skip confirmation prompts by default
    pub skip_confirmation: bool,

    /// Whether to suppress non-error output
    pub quiet: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE_STR.to_string(),
            part_size: None,
            verification: VerifyMode::default().to_string(),
            naming: PartNaming::default().to_string(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Get the path to the configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Check if a configuration file exists
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists())
    }

    /// Generate a default configuration file content as a string
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }

    /// Turn the stored strings into an engine configuration
    pub fn engine_config(&self) -> Result<EngineConfig, SettingsError> {
        let chunk_bytes = parse_size(&self.transfer.chunk_size)?;
        let chunk_sectors = sectors_of(&self.transfer.chunk_size, chunk_bytes)?;
        let chunk_sectors = u32::try_from(chunk_sectors).map_err(|_| {
            SettingsError::InvalidValue(format!("chunk size {} too large", self.transfer.chunk_size))
        })?;

        let part_size = match &self.transfer.part_size {
            Some(s) => {
                let bytes = parse_size(s)?;
                sectors_of(s, bytes)?;
                Some(bytes)
            }
            None => None,
        };

        let verify_mode: VerifyMode = self
            .transfer
            .verification
            .parse()
            .map_err(|e: crate::Error| SettingsError::InvalidValue(e.to_string()))?;
        let naming: PartNaming = self
            .transfer
            .naming
            .parse()
            .map_err(|e: crate::Error| SettingsError::InvalidValue(e.to_string()))?;

        Ok(EngineConfig::new()
            .chunk_sectors(chunk_sectors)
            .part_size(part_size)
            .retry_attempts(self.retry.attempts)
            .retry_delay(Duration::from_millis(self.retry.delay_ms))
            .verify_mode(verify_mode)
            .naming(naming)
            .confirm_restore(!self.behavior.skip_confirmation))
    }
}

fn sectors_of(text: &str, bytes: u64) -> Result<u64, SettingsError> {
    let block = u64::from(SECTOR_SIZE);
    if bytes == 0 || bytes % block != 0 {
        return Err(SettingsError::InvalidValue(format!(
            "{} is not a non-zero multiple of {} bytes",
            text, block
        )));
    }
    Ok(bytes / block)
}

/// Parse a size string like "4M", "1G", "512K" into bytes
pub fn parse_size(s: &str) -> Result<u64, SettingsError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(SettingsError::InvalidValue("empty size".to_string()));
    }

    let split_pos = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(split_pos);

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue(format!("invalid size: {}", s)))?;

    let multiplier: u64 = match suffix.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(SettingsError::InvalidValue(format!("invalid size: {}", s))),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| SettingsError::InvalidValue(format!("{} is too large", s)))
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),

    /// A setting has an unusable value
    #[error("Invalid setting: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.transfer.chunk_size, "4M");
        assert_eq!(settings.transfer.part_size, None);
        assert_eq!(settings.transfer.verification, "sparse");
        assert_eq!(settings.transfer.naming, "padded");
        assert_eq!(settings.retry.attempts, 3);
        assert_eq!(settings.retry.delay_ms, 150);
        assert!(!settings.behavior.skip_confirmation);
        assert!(!settings.behavior.quiet);
    }

    #[test]
    fn test_settings_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("splitdump.toml");

        let settings = Settings {
            transfer: TransferSettings {
                chunk_size: "1M".to_string(),
                part_size: Some("1G".to_string()),
                verification: "full-log".to_string(),
                naming: "compact".to_string(),
            },
            retry: RetrySettings {
                attempts: 5,
                delay_ms: 10,
            },
            behavior: BehaviorSettings {
                skip_confirmation: true,
                quiet: false,
            },
        };

        settings.save_to_path(Some(config_path.clone())).unwrap();
        assert!(config_path.exists());

        let loaded = Settings::load_from_path(Some(config_path));
        assert_eq!(settings, loaded);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let settings =
            Settings::load_from_path(Some(PathBuf::from("/nonexistent/splitdump.toml")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_no_path() {
        assert_eq!(Settings::load_from_path(None), Settings::default());
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("splitdump.toml");
        std::fs::write(&config_path, "[retry]\nattempts = 7\n").unwrap();

        let settings = Settings::load_from_path(Some(config_path));
        assert_eq!(settings.retry.attempts, 7);
        assert_eq!(settings.retry.delay_ms, 150);
        assert_eq!(settings.transfer.chunk_size, "4M");
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("splitdump.toml");
        std::fs::write(&config_path, "this is not valid toml {{{{").unwrap();

        let settings = Settings::load_from_path(Some(config_path));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_default_config_string() {
        let config_str = Settings::default_config_string();
        assert!(config_str.contains("[transfer]"));
        assert!(config_str.contains("[retry]"));
        assert!(config_str.contains("[behavior]"));
        assert!(config_str.contains("chunk_size"));
        assert!(!config_str.contains("part_size"));
    }

    #[test]
    fn test_config_path() {
        if let Some(p) = Settings::config_path() {
            assert!(p.to_string_lossy().contains("splitdump"));
            assert!(p.to_string_lossy().ends_with("splitdump.toml"));
        }
    }

    #[test]
    fn test_save_to_none_path() {
        let result = Settings::default().save_to_path(None);
        assert!(matches!(result, Err(SettingsError::NoConfigDir)));
    }

    #[test]
    fn test_engine_config_from_defaults() {
        let config = Settings::default().engine_config().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_from_values() {
        let mut settings = Settings::default();
        settings.transfer.chunk_size = "1M".to_string();
        settings.transfer.part_size = Some("1G".to_string());
        settings.transfer.verification = "off".to_string();
        settings.behavior.skip_confirmation = true;

        let config = settings.engine_config().unwrap();
        assert_eq!(config.chunk_sectors, 2048);
        assert_eq!(config.part_size, Some(1024 * 1024 * 1024));
        assert_eq!(config.verify_mode, VerifyMode::Off);
        assert!(!config.confirm_restore);
    }

    #[test]
    fn test_engine_config_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.transfer.chunk_size = "1000".to_string();
        assert!(settings.engine_config().is_err());

        let mut settings = Settings::default();
        settings.transfer.verification = "maybe".to_string();
        assert!(matches!(
            settings.engine_config(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4M").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512").unwrap(), 512);
        assert!(parse_size("").is_err());
        assert!(parse_size("12Q").is_err());
        assert!(parse_size("abc").is_err());
    }
}
