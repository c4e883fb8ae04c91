//! Check-log command - re-hashes a backup file against its digest log

use super::format_bytes;
use anyhow::{Context, Result};
use console::style;
use splitdump_core::{check_digest_log, digest_log_path};
use splitdump_platform::DirVolume;
use std::path::Path;

/// Execute the check-log command
pub fn execute(file: &Path, quiet: bool) -> Result<()> {
    let name = file
        .file_name()
        .with_context(|| format!("{} is not a file", file.display()))?;
    let dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut volume = DirVolume::open(dir)
        .with_context(|| format!("Cannot open directory {}", dir.display()))?;
    let report = check_digest_log(&mut volume, Path::new(name)).with_context(|| {
        format!(
            "Digest check of {} against {} failed",
            file.display(),
            digest_log_path(file).display()
        )
    })?;

    if !quiet {
        println!(
            "{} {} matches its digest log ({} chunks of {})",
            style("Success:").green(),
            file.display(),
            report.chunks,
            format_bytes(report.chunk_size)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("BOOT0");
        std::fs::write(&data, vec![0u8; 4096]).unwrap();
        assert!(execute(&data, true).is_err());
    }

    #[test]
    fn test_directory_path_fails() {
        assert!(execute(Path::new("/"), true).is_err());
    }
}
