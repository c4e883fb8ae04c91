//! Integration tests for splitdump-core
//!
//! These tests drive complete dumps and restores through the in-memory device
//! and volume.

use mockall::mock;
use splitdump_core::testing::{pattern, MemDevice, MemVolume};
use splitdump_core::{
    check_digest_log, Area, EngineConfig, EngineState, Error, FsKind, Level, Outcome, PartNaming,
    ProgressSink, Prompt, Region, RegionSelector, ResumeTracker, TracingSink, TransferEngine,
    TransferProgress, VerifyMode, Volume,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

mock! {
    Sink {}
    impl ProgressSink for Sink {
        fn progress(&self, progress: &TransferProgress);
        fn message(&self, level: Level, text: &str);
        fn confirm(&self, prompt: &Prompt) -> bool;
    }
}

const SECTORS: u64 = 2048;
const PART_SECTORS: u64 = 256;

fn source() -> Vec<u8> {
    pattern(SECTORS as usize * 512)
}

/// 2048-sector region, 256-sector parts, room for two parts
fn constrained_config() -> EngineConfig {
    EngineConfig::new()
        .chunk_sectors(64)
        .part_size(Some(PART_SECTORS * 512))
        .file_size_ceiling(512 * 1024)
        .retry_delay(Duration::ZERO)
        .verify_mode(VerifyMode::Full)
}

fn constrained_volume() -> MemVolume {
    MemVolume::new(PART_SECTORS * 512 * 2 + 512).with_kind(FsKind::SmallFileLimited)
}

fn part_name(index: u32) -> PathBuf {
    PathBuf::from(format!("rawnand.bin.{:02}", index))
}

// ============================================================================
// Space-constrained multi-session dump
// ============================================================================

#[test]
fn test_constrained_dump_resumes_until_done() {
    let volume = constrained_volume();
    let device = MemDevice::with_data(source());
    let region = Region::raw(SECTORS).unwrap();
    let mut engine = TransferEngine::new(
        device,
        volume.clone(),
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap();

    let mut collected: Vec<Vec<u8>> = Vec::new();
    let mut sessions = 0;

    loop {
        sessions += 1;
        assert!(sessions <= 8, "dump never finished");

        let report = engine.dump(&region, Path::new("rawnand.bin")).unwrap();
        assert_eq!(report.part_count, 8);

        // Move every part off the medium, as the operator would
        for index in 0..8 {
            if let Some(data) = volume.remove(part_name(index)) {
                collected.push(data);
            }
        }

        match report.outcome {
            Outcome::PartialAwaitingSpace { completed_parts } => {
                assert_eq!(engine.state(), EngineState::PartialAwaitingSpace);
                assert_eq!(completed_parts, collected.len() as u32);
                let record = volume.contents("partial.idx").unwrap();
                assert_eq!(record, completed_parts.to_le_bytes().to_vec());
            }
            Outcome::Done => break,
        }
    }

    assert_eq!(sessions, 4);
    assert_eq!(engine.state(), EngineState::Done);
    assert!(volume.contents("partial.idx").is_none());
    assert_eq!(collected.concat(), source());
}

#[test]
fn test_first_session_stops_after_two_parts() {
    let volume = constrained_volume();
    let mut engine = TransferEngine::new(
        MemDevice::with_data(source()),
        volume.clone(),
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap();

    let report = engine
        .dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap();
    assert_eq!(
        report.outcome,
        Outcome::PartialAwaitingSpace { completed_parts: 2 }
    );
    assert_eq!(report.parts_written, 2);
    assert_eq!(
        volume.paths(),
        vec![
            PathBuf::from("partial.idx"),
            part_name(0),
            part_name(1)
        ]
    );
}

#[test]
fn test_full_destination_is_reported() {
    let volume = MemVolume::new(100 * 512);
    let mut engine = TransferEngine::new(
        MemDevice::with_data(source()),
        volume.clone(),
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap();

    let err = engine
        .dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientSpace { .. }));
    assert!(volume.paths().is_empty());
}

#[test]
fn test_corrupt_resume_record_is_rejected() {
    let volume = constrained_volume();
    volume.insert("partial.idx", vec![1, 0, 0]);
    let mut engine = TransferEngine::new(
        MemDevice::with_data(source()),
        volume,
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap();

    assert!(matches!(
        engine.dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin")),
        Err(Error::InvalidResume(_))
    ));
}

#[test]
fn test_resume_record_in_custom_dir() {
    let volume = constrained_volume();
    let mut engine = TransferEngine::new(
        MemDevice::with_data(source()),
        volume.clone(),
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap()
    .with_resume_tracker(ResumeTracker::in_dir("state"));

    engine
        .dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap();
    assert_eq!(
        volume.contents("state/partial.idx").unwrap(),
        2u32.to_le_bytes().to_vec()
    );
}

#[test]
fn test_failed_resume_record_aborts_dump() {
    let volume = constrained_volume();
    volume.fail_writes_to("partial.idx");
    let mut engine = TransferEngine::new(
        MemDevice::with_data(source()),
        volume.clone(),
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap();

    let err = engine
        .dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap_err();
    assert!(matches!(err, Error::ResumeRecord { .. }));
    assert_eq!(engine.state(), EngineState::Failed);

    // The verified first part stays, the next one is never opened
    let first = PART_SECTORS as usize * 512;
    assert_eq!(volume.contents(part_name(0)).unwrap(), source()[..first].to_vec());
    assert!(volume.contents(part_name(1)).is_none());
}

// ============================================================================
// Verification
// ============================================================================

#[test]
fn test_digest_log_dump_can_be_checked_offline() {
    let volume = MemVolume::new(1 << 24);
    let config = EngineConfig::new()
        .chunk_sectors(64)
        .verify_mode(VerifyMode::FullWithLog);
    let mut engine = TransferEngine::new(
        MemDevice::with_data(source()),
        volume.clone(),
        TracingSink::new(true),
        config,
    )
    .unwrap();

    engine
        .dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap();

    let mut volume = volume;
    let report = check_digest_log(&mut volume, Path::new("rawnand.bin")).unwrap();
    assert_eq!(report.chunk_size, 64 * 512);
    assert_eq!(report.chunks, SECTORS / 64);
}

#[test]
fn test_cancel_during_verification_keeps_data() {
    let volume = MemVolume::new(1 << 24);
    let device = MemDevice::with_data(source());
    let mut sink = MockSink::new();
    sink.expect_progress().return_const(());
    sink.expect_confirm().return_const(true);
    sink.expect_message().return_const(());

    let engine = TransferEngine::new(
        device,
        volume.clone(),
        sink,
        EngineConfig::new().chunk_sectors(64),
    )
    .unwrap();
    let handle = engine.cancel_handle();
    let watched = volume.clone();
    // Trip the cancel flag once the file is fully written
    let mut engine = engine.with_cancel_predicate(move || {
        watched
            .contents("rawnand.bin")
            .is_some_and(|d| d.len() == SECTORS as usize * 512)
    });

    // A cancelled verification is reported as skipped, not as a failure
    let report = engine
        .dump(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap();
    assert_eq!(report.outcome, Outcome::Done);
    assert!(!report.verified);
    assert_eq!(engine.state(), EngineState::Done);
    assert!(!handle.load(Ordering::SeqCst));
    assert_eq!(volume.contents("rawnand.bin").unwrap(), source());
}

// ============================================================================
// Restore
// ============================================================================

#[test]
fn test_restore_split_set() {
    let data = source();
    let volume = MemVolume::new(1 << 24);
    for index in 0..8u32 {
        let start = index as usize * PART_SECTORS as usize * 512;
        let end = start + PART_SECTORS as usize * 512;
        volume.insert(part_name(index), data[start..end].to_vec());
    }

    let mut sink = MockSink::new();
    sink.expect_progress().return_const(());
    sink.expect_message().return_const(());
    sink.expect_confirm()
        .withf(|p| matches!(p, Prompt::DestructiveRestore { region } if region == "rawnand.bin"))
        .times(1)
        .return_const(true);

    let mut engine =
        TransferEngine::new(MemDevice::new(SECTORS), volume, sink, constrained_config()).unwrap();
    let report = engine
        .restore(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap();

    assert_eq!(report.part_count, 8);
    assert_eq!(report.sectors_transferred, SECTORS);
    assert_eq!(engine.device().area_data(Area::UserData), &data[..]);
}

#[test]
fn test_restore_one_sector_short_declined() {
    let volume = MemVolume::new(1 << 24);
    volume.insert("rawnand.bin", pattern((SECTORS as usize - 1) * 512));

    let mut sink = MockSink::new();
    sink.expect_message().return_const(());
    sink.expect_confirm()
        .withf(|p| matches!(p, Prompt::DestructiveRestore { .. }))
        .return_const(true);
    sink.expect_confirm()
        .withf(|p| matches!(p, Prompt::SizeMismatch { .. }))
        .times(1)
        .return_const(false);

    let mut engine =
        TransferEngine::new(MemDevice::new(SECTORS), volume, sink, constrained_config()).unwrap();
    let err = engine
        .restore(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap_err();

    assert!(matches!(err, Error::SizeMismatch { .. }));
    assert_eq!(engine.device().write_count(), 0);
    assert_eq!(engine.state(), EngineState::Failed);
}

#[test]
fn test_restore_failure_leaves_backup_in_place() {
    let data = source();
    let volume = MemVolume::new(1 << 24);
    volume.insert("rawnand.bin", data.clone());
    let mut device = MemDevice::new(SECTORS);
    device.fail_writes_at(512, 4);

    let mut engine = TransferEngine::new(
        device,
        volume.clone(),
        TracingSink::new(true),
        constrained_config(),
    )
    .unwrap();
    let err = engine
        .restore(&Region::raw(SECTORS).unwrap(), Path::new("rawnand.bin"))
        .unwrap_err();

    assert!(matches!(err, Error::DeviceFault { lba: 512, .. }));
    assert_eq!(volume.contents("rawnand.bin").unwrap(), data);
}

#[test]
fn test_boot_partitions_dump_and_restore() {
    let volume = MemVolume::new(1 << 24);
    let device = MemDevice::new(64).with_boot_sectors(128);
    let regions = RegionSelector::Boot.resolve(&device, &[]).unwrap();
    assert_eq!(regions.len(), 2);

    let config = EngineConfig::new()
        .chunk_sectors(32)
        .naming(PartNaming::Compact)
        .verify_mode(VerifyMode::Sparse);
    let mut engine =
        TransferEngine::new(device, volume.clone(), TracingSink::new(true), config).unwrap();

    for region in &regions {
        let base = PathBuf::from("boot").join(&region.name);
        let report = engine.dump(region, &base).unwrap();
        assert_eq!(report.sectors_transferred, 128);
    }

    let boot0 = engine.device().area_data(Area::Boot0).to_vec();
    let boot1 = engine.device().area_data(Area::Boot1).to_vec();
    assert_eq!(volume.contents("boot/BOOT0").unwrap(), boot0);
    assert_eq!(volume.contents("boot/BOOT1").unwrap(), boot1);

    // Round trip into a blank device
    let (_, volume, _) = engine.into_parts();
    let mut blank = MemDevice::new(64).with_boot_sectors(128);
    blank.set_area(Area::Boot0, vec![0; 128 * 512]);
    blank.set_area(Area::Boot1, vec![0; 128 * 512]);
    let mut engine = TransferEngine::new(
        blank,
        volume,
        TracingSink::new(true),
        EngineConfig::new().chunk_sectors(32),
    )
    .unwrap();
    for region in &regions {
        engine
            .restore(region, &PathBuf::from("boot").join(&region.name))
            .unwrap();
    }
    assert_eq!(engine.device().area_data(Area::Boot0), &boot0[..]);
    assert_eq!(engine.device().area_data(Area::Boot1), &boot1[..]);
    assert!(engine.volume().exists(Path::new("boot/BOOT0")));
}
