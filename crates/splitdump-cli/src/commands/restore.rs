//! Restore command - writes a backup from the destination back to the device

use super::{display_base, format_bytes, resolve_regions, DestinationArgs, DeviceArgs, TransferArgs};
use crate::progress::TerminalSink;
use anyhow::{Context, Result};
use console::style;
use splitdump_core::{format_duration, TransferEngine, SECTOR_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Arguments for the restore command
pub struct RestoreArgs {
    /// Target device
    pub device: DeviceArgs,
    /// Directory holding the backup
    pub destination: DestinationArgs,
    /// Region selection and transfer settings
    pub transfer: TransferArgs,
    /// Answer every prompt with yes
    pub skip_confirm: bool,
    /// Suppress non-error output
    pub quiet: bool,
    /// Cleared by the Ctrl+C handler
    pub cancel_flag: Arc<AtomicBool>,
}

/// Execute the restore command
pub fn execute(args: RestoreArgs) -> Result<()> {
    let config = args.transfer.engine_config()?;
    let selector = args.transfer.selector()?;

    let device = args.device.open(true)?;
    let (device, regions) = resolve_regions(device, &selector)?;
    let volume = args.destination.open()?;

    if !args.quiet {
        println!("{}", style("Splitdump").bold());
        println!(
            "  {} {}",
            style("Backup:").dim(),
            args.destination.dest.display()
        );
        println!(
            "  {} {} {}",
            style("Target:").dim(),
            args.device.device.display(),
            style("(will be overwritten)").red()
        );
        println!();
    }

    let sink = TerminalSink::new(args.skip_confirm, args.quiet);
    let running = args.cancel_flag.clone();
    let mut engine = TransferEngine::new(device, volume, &sink, config)
        .context("Invalid engine configuration")?
        .with_cancel_predicate(move || !running.load(Ordering::SeqCst));

    for region in &regions {
        let base = args.destination.base_for(region);
        if !args.quiet {
            println!(
                "{} {} -> {} ({})",
                style("Restoring").cyan().bold(),
                display_base(&args.destination.dest, &base),
                region.name,
                format_bytes(region.byte_len(SECTOR_SIZE))
            );
        }

        let result = engine.restore(region, &base);
        sink.finish();
        let report = result.with_context(|| format!("Failed to restore {}", region.name))?;

        if !args.quiet {
            let files = if report.part_count > 0 {
                format!("{} parts", report.part_count)
            } else {
                "single file".to_string()
            };
            println!(
                "{} {} from {} in {}{}",
                style("Success:").green(),
                region.name,
                files,
                format_duration(report.elapsed.as_secs()),
                if report.verified { ", verified" } else { "" }
            );
        }
    }

    Ok(())
}
