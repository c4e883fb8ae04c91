//! Destination filesystem capability
//!
//! Backups land on a mounted volume that may be small, FAT32 formatted, or
//! both. The engine reaches it only through [`Volume`], with paths relative to
//! the volume root.

use crate::planner::FsKind;
use std::io::{self, Read, Seek, Write};
use std::path::Path;

/// How a file on the volume is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only
    Read,
    /// Create or truncate, write only
    Create,
}

/// An open file on the volume
pub trait VolumeFile: Read + Write + Seek {
    /// Flush data and metadata to the medium
    fn sync(&mut self) -> io::Result<()>;
}

impl VolumeFile for std::fs::File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// A mounted destination filesystem
pub trait Volume {
    /// File handle type
    type File: VolumeFile;

    /// Open `path`
    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<Self::File>;

    /// Size of the file at `path` in bytes
    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Whether a file exists at `path`
    fn exists(&self, path: &Path) -> bool {
        self.size(path).is_ok()
    }

    /// Remove the file at `path`
    fn unlink(&mut self, path: &Path) -> io::Result<()>;

    /// File names directly inside `dir`
    fn list(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Create `dir` and its parents
    fn create_dir_all(&mut self, dir: &Path) -> io::Result<()>;

    /// Bytes currently free
    fn free_bytes(&self) -> io::Result<u64>;

    /// Capacity of the volume in bytes
    fn total_bytes(&self) -> io::Result<u64>;

    /// Filesystem class, which decides the single-file ceiling
    fn kind(&self) -> FsKind;
}

impl<V: Volume + ?Sized> Volume for &mut V {
    type File = V::File;

    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<Self::File> {
        (**self).open(path, mode)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        (**self).size(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn unlink(&mut self, path: &Path) -> io::Result<()> {
        (**self).unlink(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        (**self).list(dir)
    }

    fn create_dir_all(&mut self, dir: &Path) -> io::Result<()> {
        (**self).create_dir_all(dir)
    }

    fn free_bytes(&self) -> io::Result<u64> {
        (**self).free_bytes()
    }

    fn total_bytes(&self) -> io::Result<u64> {
        (**self).total_bytes()
    }

    fn kind(&self) -> FsKind {
        (**self).kind()
    }
}

/// Names in `dir` that look like parts of `base` (`<base>.<digits>`), sorted
pub fn part_files_of<V: Volume + ?Sized>(volume: &V, base: &Path) -> io::Result<Vec<String>> {
    let Some(file_name) = base.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = base.parent().unwrap_or_else(|| Path::new(""));
    let prefix = format!("{}.", file_name);

    let mut parts: Vec<String> = volume
        .list(dir)?
        .into_iter()
        .filter(|name| {
            name.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        })
        .collect();
    parts.sort();
    Ok(parts)
}
