//! In-memory device and volume for tests and dry runs
//!
//! [`MemDevice`] holds each hardware area as a byte vector and can be told to
//! fail reads or writes a number of times. [`MemVolume`] is a flat file map
//! with a hard capacity, so "destination full" situations are easy to stage.
//! Clones of a `MemVolume` share the same files.

use crate::device::{Area, BlockDevice, DeviceFault, SECTOR_SIZE};
use crate::planner::FsKind;
use crate::volume::{OpenMode, Volume, VolumeFile};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Deterministic, non-repeating-per-sector test data
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let x = (i as u32).wrapping_mul(2_654_435_761) ^ ((i / 512) as u32).wrapping_mul(40_503);
            (x >> 13) as u8
        })
        .collect()
}

// ============================================================================
// MemDevice
// ============================================================================

/// Block device backed by memory
#[derive(Debug, Clone)]
pub struct MemDevice {
    block_size: u32,
    areas: HashMap<Area, Vec<u8>>,
    read_faults: Vec<(Area, u32, u32)>,
    write_faults: Vec<(Area, u32, u32)>,
    reads: usize,
    writes: usize,
}

impl MemDevice {
    /// Device with a zeroed user area of `sectors` blocks
    pub fn new(sectors: u64) -> Self {
        Self::with_data(vec![0u8; sectors as usize * SECTOR_SIZE as usize])
    }

    /// Device whose user area holds `data` (padded to whole blocks)
    pub fn with_data(mut data: Vec<u8>) -> Self {
        let block = SECTOR_SIZE as usize;
        data.resize(data.len().div_ceil(block) * block, 0);
        let mut areas = HashMap::new();
        areas.insert(Area::UserData, data);
        Self {
            block_size: SECTOR_SIZE,
            areas,
            read_faults: Vec::new(),
            write_faults: Vec::new(),
            reads: 0,
            writes: 0,
        }
    }

    /// Add both boot areas with `sectors` blocks of pattern data
    pub fn with_boot_sectors(mut self, sectors: u64) -> Self {
        let len = sectors as usize * self.block_size as usize;
        self.areas.insert(Area::Boot0, pattern(len));
        self.areas.insert(Area::Boot1, pattern(len).into_iter().rev().collect());
        self
    }

    /// Replace the contents of `area`
    pub fn set_area(&mut self, area: Area, data: Vec<u8>) {
        self.areas.insert(area, data);
    }

    /// Contents of `area` (empty if absent)
    pub fn area_data(&self, area: Area) -> &[u8] {
        self.areas.get(&area).map_or(&[], Vec::as_slice)
    }

    /// Fail the next `times` reads touching `lba` in the user area
    pub fn fail_reads_at(&mut self, lba: u32, times: u32) {
        self.read_faults.push((Area::UserData, lba, times));
    }

    /// Fail the next `times` writes touching `lba` in the user area
    pub fn fail_writes_at(&mut self, lba: u32, times: u32) {
        self.write_faults.push((Area::UserData, lba, times));
    }

    /// Successful read calls so far
    pub fn read_count(&self) -> usize {
        self.reads
    }

    /// Successful write calls so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn range(&self, area: Area, lba: u32, count: u32, buf_len: usize) -> Result<std::ops::Range<usize>, DeviceFault> {
        let block = self.block_size as usize;
        let start = lba as usize * block;
        let end = start + count as usize * block;
        let len = self.areas.get(&area).map_or(0, Vec::len);
        if end > len {
            return Err(DeviceFault(format!(
                "{} blocks @ {:#X} beyond end of {}",
                count, lba, area
            )));
        }
        if buf_len != end - start {
            return Err(DeviceFault(format!(
                "buffer of {} bytes for {} blocks",
                buf_len, count
            )));
        }
        Ok(start..end)
    }
}

fn take_fault(faults: &mut [(Area, u32, u32)], area: Area, lba: u32, count: u32) -> bool {
    for (fault_area, fault_lba, remaining) in faults.iter_mut() {
        let hit = *fault_area == area
            && *fault_lba >= lba
            && u64::from(*fault_lba) < u64::from(lba) + u64::from(count);
        if hit && *remaining > 0 {
            *remaining -= 1;
            return true;
        }
    }
    false
}

impl BlockDevice for MemDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn area_sectors(&self, area: Area) -> u64 {
        self.areas.get(&area).map_or(0, |d| d.len() as u64) / u64::from(self.block_size)
    }

    fn read_blocks(&mut self, area: Area, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceFault> {
        if take_fault(&mut self.read_faults, area, lba, count) {
            return Err(DeviceFault("injected read fault".to_string()));
        }
        let range = self.range(area, lba, count, buf.len())?;
        let data = self.areas.get(&area).map_or(&[][..], Vec::as_slice);
        buf.copy_from_slice(&data[range]);
        self.reads += 1;
        Ok(())
    }

    fn write_blocks(&mut self, area: Area, lba: u32, count: u32, buf: &[u8]) -> Result<(), DeviceFault> {
        if take_fault(&mut self.write_faults, area, lba, count) {
            return Err(DeviceFault("injected write fault".to_string()));
        }
        let range = self.range(area, lba, count, buf.len())?;
        if let Some(data) = self.areas.get_mut(&area) {
            data[range].copy_from_slice(buf);
        }
        self.writes += 1;
        Ok(())
    }
}

// ============================================================================
// MemVolume
// ============================================================================

#[derive(Debug)]
struct VolumeState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    capacity: u64,
    kind: FsKind,
    failing: Vec<PathBuf>,
    syncs: usize,
}

impl VolumeState {
    fn used(&self) -> u64 {
        self.files.values().map(|f| f.len() as u64).sum()
    }
}

/// Flat in-memory filesystem with a fixed capacity
#[derive(Debug, Clone)]
pub struct MemVolume {
    state: Rc<RefCell<VolumeState>>,
}

impl MemVolume {
    /// Empty large-file-capable volume holding at most `capacity` bytes
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(VolumeState {
                files: BTreeMap::new(),
                capacity,
                kind: FsKind::LargeFileCapable,
                failing: Vec::new(),
                syncs: 0,
            })),
        }
    }

    /// Set the filesystem class
    pub fn with_kind(self, kind: FsKind) -> Self {
        self.state.borrow_mut().kind = kind;
        self
    }

    /// Change the capacity
    pub fn set_capacity(&self, capacity: u64) {
        self.state.borrow_mut().capacity = capacity;
    }

    /// Create or replace a file, ignoring the capacity
    pub fn insert(&self, path: impl AsRef<Path>, data: Vec<u8>) {
        self.state
            .borrow_mut()
            .files
            .insert(path.as_ref().to_path_buf(), data);
    }

    /// Remove a file if present
    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.borrow_mut().files.remove(path.as_ref())
    }

    /// Copy of a file's contents
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.borrow().files.get(path.as_ref()).cloned()
    }

    /// All file paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.borrow().files.keys().cloned().collect()
    }

    /// Invert one bit of a stored file
    pub fn flip_bit(&self, path: impl AsRef<Path>, byte: usize, bit: u8) {
        if let Some(data) = self.state.borrow_mut().files.get_mut(path.as_ref()) {
            if let Some(b) = data.get_mut(byte) {
                *b ^= 1 << (bit % 8);
            }
        }
    }

    /// Make every write to `path` fail
    pub fn fail_writes_to(&self, path: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .failing
            .push(path.as_ref().to_path_buf());
    }

    /// Number of file syncs performed
    pub fn sync_count(&self) -> usize {
        self.state.borrow().syncs
    }

    /// Bytes stored
    pub fn used_bytes(&self) -> u64 {
        self.state.borrow().used()
    }
}

/// Open file on a [`MemVolume`]
#[derive(Debug)]
pub struct MemFile {
    state: Rc<RefCell<VolumeState>>,
    path: PathBuf,
    pos: u64,
    writable: bool,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.borrow();
        let data = state
            .files
            .get(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file removed"))?;
        let start = (self.pos as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened read only",
            ));
        }
        let mut state = self.state.borrow_mut();
        if state.failing.contains(&self.path) {
            return Err(io::Error::other("injected write failure"));
        }

        let current = state.files.get(&self.path).map_or(0, |d| d.len() as u64);
        let end = self.pos + buf.len() as u64;
        let growth = end.saturating_sub(current);
        if state.used() + growth > state.capacity {
            return Err(io::Error::other("no space left on volume"));
        }

        let data = state.files.entry(self.path.clone()).or_default();
        if data.len() < end as usize {
            data.resize(end as usize, 0);
        }
        data[self.pos as usize..end as usize].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self
            .state
            .borrow()
            .files
            .get(&self.path)
            .map_or(0, |d| d.len() as i64);
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl VolumeFile for MemFile {
    fn sync(&mut self) -> io::Result<()> {
        self.state.borrow_mut().syncs += 1;
        Ok(())
    }
}

impl Volume for MemVolume {
    type File = MemFile;

    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<MemFile> {
        let mut state = self.state.borrow_mut();
        match mode {
            OpenMode::Read => {
                if !state.files.contains_key(path) {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} not found", path.display()),
                    ));
                }
            }
            OpenMode::Create => {
                state.files.insert(path.to_path_buf(), Vec::new());
            }
        }
        Ok(MemFile {
            state: Rc::clone(&self.state),
            path: path.to_path_buf(),
            pos: 0,
            writable: mode == OpenMode::Create,
        })
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.state
            .borrow()
            .files
            .get(path)
            .map(|d| d.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not found"))
    }

    fn unlink(&mut self, path: &Path) -> io::Result<()> {
        self.state
            .borrow_mut()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not found"))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        Ok(self
            .state
            .borrow()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect())
    }

    fn create_dir_all(&mut self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn free_bytes(&self) -> io::Result<u64> {
        let state = self.state.borrow();
        Ok(state.capacity.saturating_sub(state.used()))
    }

    fn total_bytes(&self) -> io::Result<u64> {
        Ok(self.state.borrow().capacity)
    }

    fn kind(&self) -> FsKind {
        self.state.borrow().kind
    }
}
