//! Destination volume rooted at a host directory

use crate::{disk_space, filesystem_name, fs_kind_from_name, PlatformError, Result};
use splitdump_core::{FsKind, OpenMode, Volume};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// [`Volume`] backed by a directory
///
/// All engine paths are relative to the root. A quota caps the space the
/// engine may use below what the filesystem reports, which is also how small
/// media are simulated on a large disk.
#[derive(Debug, Clone)]
pub struct DirVolume {
    root: PathBuf,
    kind: FsKind,
    quota: Option<u64>,
}

impl DirVolume {
    /// Use `root`, detecting the filesystem class from the OS
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PlatformError::NotFound(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let kind = match filesystem_name(&root) {
            Ok(name) => {
                let kind = fs_kind_from_name(&name);
                debug!(root = %root.display(), filesystem = %name, ?kind, "Detected filesystem");
                kind
            }
            Err(e) => {
                warn!(root = %root.display(), "Cannot detect filesystem, assuming FAT32: {}", e);
                FsKind::SmallFileLimited
            }
        };

        Ok(Self {
            root,
            kind,
            quota: None,
        })
    }

    /// Override the detected filesystem class
    pub fn with_kind(mut self, kind: FsKind) -> Self {
        self.kind = kind;
        self
    }

    /// Limit the volume to `bytes` in total
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn used_bytes(&self) -> io::Result<u64> {
        fn walk(dir: &Path) -> io::Result<u64> {
            let mut total = 0;
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                total += if meta.is_dir() {
                    walk(&entry.path())?
                } else {
                    meta.len()
                };
            }
            Ok(total)
        }
        walk(&self.root)
    }
}

fn to_io(err: PlatformError) -> io::Error {
    match err {
        PlatformError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

impl Volume for DirVolume {
    type File = File;

    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<File> {
        let full = self.resolve(path);
        match mode {
            OpenMode::Read => File::open(&full),
            OpenMode::Create => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&full),
        }
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        let meta = fs::metadata(self.resolve(path))?;
        if meta.is_file() {
            Ok(meta.len())
        } else {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"))
        }
    }

    fn unlink(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(dir))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&mut self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(dir))
    }

    fn free_bytes(&self) -> io::Result<u64> {
        let free = disk_space(&self.root).map_err(to_io)?.free;
        match self.quota {
            Some(quota) => Ok(quota.saturating_sub(self.used_bytes()?).min(free)),
            None => Ok(free),
        }
    }

    fn total_bytes(&self) -> io::Result<u64> {
        match self.quota {
            Some(quota) => Ok(quota),
            None => Ok(disk_space(&self.root).map_err(to_io)?.total),
        }
    }

    fn kind(&self) -> FsKind {
        self.kind
    }
}
