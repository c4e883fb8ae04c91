//! Progress, messages and confirmations flowing out of the engine
//!
//! The engine does no rendering. Whatever front end drives it (terminal,
//! GUI, tests) implements [`ProgressSink`].

use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Which pass the engine is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Copying data
    Transfer,
    /// Re-reading and comparing
    Verify,
}

/// Progress snapshot, emitted whenever the percentage changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    /// Current pass
    pub phase: Phase,
    /// Region being transferred
    pub region: String,
    /// Part being processed (0 for a single file)
    pub part_index: u32,
    /// Next LBA to process
    pub lba_current: u32,
    /// Bytes already written to (or read from) the current part
    pub bytes_written_in_part: u64,
    /// Completion of the whole region, 0..=100
    pub percent: u8,
}

/// Severity of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Informational
    Info,
    /// Something went wrong but the operation continues
    Warn,
    /// The operation is failing
    Error,
}

/// Questions the engine asks the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// A backup already exists where the dump would write
    BackupExists {
        /// First file that would be overwritten
        path: PathBuf,
        /// Part files of an earlier set found next to it
        stale_parts: usize,
    },
    /// The backup on the destination is not the size of the region
    SizeMismatch {
        /// Sectors in the region
        expected_sectors: u64,
        /// Sectors found on the destination
        found_sectors: u64,
    },
    /// Restoring overwrites the device
    DestructiveRestore {
        /// Region about to be overwritten
        region: String,
    },
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prompt::BackupExists { path, stale_parts } if *stale_parts > 0 => write!(
                f,
                "{} already exists ({} part files). Overwrite?",
                path.display(),
                stale_parts
            ),
            Prompt::BackupExists { path, .. } => {
                write!(f, "{} already exists. Overwrite?", path.display())
            }
            Prompt::SizeMismatch {
                expected_sectors,
                found_sectors,
            } => write!(
                f,
                "Backup holds {} sectors but the region has {}. Continue anyway?",
                found_sectors, expected_sectors
            ),
            Prompt::DestructiveRestore { region } => write!(
                f,
                "Restoring {} overwrites the device and may leave it unbootable. Continue?",
                region
            ),
        }
    }
}

/// Receiver for everything the engine reports
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink {
    /// Progress changed
    fn progress(&self, progress: &TransferProgress);

    /// A message for the operator
    fn message(&self, level: Level, text: &str);

    /// Ask a yes/no question; `true` means go ahead
    fn confirm(&self, prompt: &Prompt) -> bool;
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn progress(&self, progress: &TransferProgress) {
        (**self).progress(progress);
    }

    fn message(&self, level: Level, text: &str) {
        (**self).message(level, text);
    }

    fn confirm(&self, prompt: &Prompt) -> bool {
        (**self).confirm(prompt)
    }
}

/// Sink that only logs, answering every prompt the same way
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    assume_yes: bool,
}

impl TracingSink {
    /// Sink that answers prompts with `assume_yes`
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl ProgressSink for TracingSink {
    fn progress(&self, progress: &TransferProgress) {
        debug!(
            region = %progress.region,
            phase = ?progress.phase,
            lba = progress.lba_current,
            percent = progress.percent,
            "Progress"
        );
    }

    fn message(&self, level: Level, text: &str) {
        match level {
            Level::Info => info!("{}", text),
            Level::Warn => warn!("{}", text),
            Level::Error => error!("{}", text),
        }
    }

    fn confirm(&self, prompt: &Prompt) -> bool {
        info!(answer = self.assume_yes, "{}", prompt);
        self.assume_yes
    }
}

/// Forwards progress to a sink only when the percentage or phase changes
#[derive(Debug, Default)]
pub struct Reporter {
    last: Option<(Phase, u8)>,
}

impl Reporter {
    /// Create a reporter that has emitted nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `progress` if it differs from the last emission
    pub fn update<S: ProgressSink + ?Sized>(&mut self, sink: &S, progress: TransferProgress) -> bool {
        let key = (progress.phase, progress.percent);
        if self.last == Some(key) {
            return false;
        }
        self.last = Some(key);
        sink.progress(&progress);
        true
    }

    /// Forget the last emission so the next update is always sent
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Format a duration in seconds for display (e.g., "2m 30s")
pub fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
