//! Integration tests for splitdump-platform
//!
//! These tests run the engine against image files and a temporary
//! directory, so they work on every platform without real devices.

use splitdump_core::testing::pattern;
use splitdump_core::{
    Area, BlockDevice, EngineConfig, Outcome, Region, RegionSelector, RegionSource, TracingSink,
    TransferEngine, VerifyMode,
};
use splitdump_platform::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const SECTORS: usize = 2048;

struct Fixture {
    _dir: TempDir,
    image: PathBuf,
    dest: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("user.img");
    std::fs::write(&image, pattern(SECTORS * 512)).unwrap();
    let dest = dir.path().join("sd");
    std::fs::create_dir(&dest).unwrap();
    Fixture {
        _dir: dir,
        image,
        dest,
    }
}

fn config() -> EngineConfig {
    EngineConfig::new()
        .chunk_sectors(64)
        .retry_delay(Duration::ZERO)
        .verify_mode(VerifyMode::Full)
}

// ============================================================================
// Dump and restore through real files
// ============================================================================

#[test]
fn test_dump_to_directory() {
    let fx = fixture();
    let device = ImageDevice::open(&AreaPaths::new(&fx.image), false).unwrap();
    let volume = DirVolume::open(&fx.dest)
        .unwrap()
        .with_kind(splitdump_core::FsKind::LargeFileCapable);

    let region = RegionSelector::Raw.resolve(&device, &[]).unwrap().remove(0);
    let mut engine = TransferEngine::new(device, volume, TracingSink::new(true), config()).unwrap();
    let report = engine.dump(&region, Path::new("backup/rawnand.bin")).unwrap();

    assert_eq!(report.outcome, Outcome::Done);
    let written = std::fs::read(fx.dest.join("backup/rawnand.bin")).unwrap();
    assert_eq!(written, pattern(SECTORS * 512));
}

#[test]
fn test_quota_forces_split_and_resume() {
    let fx = fixture();
    let part_bytes = 256 * 512;
    let config = config()
        .part_size(Some(part_bytes))
        .file_size_ceiling(512 * 1024);

    let mut collected = Vec::new();
    for _ in 0..4 {
        let device = ImageDevice::open(&AreaPaths::new(&fx.image), false).unwrap();
        let volume = DirVolume::open(&fx.dest)
            .unwrap()
            .with_quota(2 * part_bytes + 512);
        let mut engine =
            TransferEngine::new(device, volume, TracingSink::new(true), config.clone()).unwrap();

        let report = engine
            .dump(&Region::raw(SECTORS as u64).unwrap(), Path::new("rawnand.bin"))
            .unwrap();

        for index in 0..8 {
            let part = fx.dest.join(format!("rawnand.bin.{:02}", index));
            if part.exists() {
                collected.push(std::fs::read(&part).unwrap());
                std::fs::remove_file(&part).unwrap();
            }
        }
        if report.outcome == Outcome::Done {
            break;
        }
    }

    assert!(!fx.dest.join("partial.idx").exists());
    assert_eq!(collected.concat(), pattern(SECTORS * 512));
}

#[test]
fn test_restore_into_image() {
    let fx = fixture();
    let target = fx.dest.join("blank.img");
    std::fs::write(&target, vec![0u8; SECTORS * 512]).unwrap();
    std::fs::write(fx.dest.join("rawnand.bin"), std::fs::read(&fx.image).unwrap()).unwrap();

    let device = ImageDevice::open(&AreaPaths::new(&target), true).unwrap();
    let volume = DirVolume::open(&fx.dest).unwrap();
    let mut engine = TransferEngine::new(device, volume, TracingSink::new(true), config()).unwrap();

    engine
        .restore(&Region::raw(SECTORS as u64).unwrap(), Path::new("rawnand.bin"))
        .unwrap();
    drop(engine);

    assert_eq!(std::fs::read(&target).unwrap(), pattern(SECTORS * 512));
}

#[test]
fn test_boot_areas_from_images() {
    let fx = fixture();
    let boot0 = fx.dest.join("boot0.img");
    let boot1 = fx.dest.join("boot1.img");
    std::fs::write(&boot0, vec![0xB0; 32 * 512]).unwrap();
    std::fs::write(&boot1, vec![0xB1; 32 * 512]).unwrap();

    let paths = AreaPaths::new(&fx.image).boot0(&boot0).boot1(&boot1);
    let device = ImageDevice::open(&paths, false).unwrap();
    assert_eq!(device.area_sectors(Area::Boot1), 32);

    let regions = RegionSelector::Boot.resolve(&device, &[]).unwrap();
    assert_eq!(regions[0].name, "BOOT0");
    assert_eq!(regions[1].area, Area::Boot1);
}

#[test]
fn test_partition_source_on_blank_image() {
    let fx = fixture();
    let device = ImageDevice::open(&AreaPaths::new(&fx.image), false).unwrap();
    let mut source = TableRegionSource::new(device);
    // Pattern data carries no MBR signature
    assert!(source.partitions().unwrap().is_empty());
}

// ============================================================================
// Error handling tests
// ============================================================================

#[test]
fn test_error_messages() {
    let errors = vec![
        PlatformError::PermissionDenied("test".to_string()),
        PlatformError::DeviceBusy("test".to_string()),
        PlatformError::NotFound("test".to_string()),
        PlatformError::NotSupported("test".to_string()),
        PlatformError::InvalidDevice("test".to_string()),
    ];

    for err in errors {
        assert!(err.to_string().contains("test"));
    }
}
