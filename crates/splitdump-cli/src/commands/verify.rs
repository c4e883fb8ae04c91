//! Verify command - compares backups on the destination with the device

use super::{display_base, resolve_regions, DestinationArgs, DeviceArgs, TransferArgs};
use crate::progress::TerminalSink;
use anyhow::{Context, Result};
use console::style;
use splitdump_core::{format_duration, TransferEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Arguments for the verify command
pub struct VerifyArgs {
    /// Device the backup was taken from
    pub device: DeviceArgs,
    /// Directory holding the backup
    pub destination: DestinationArgs,
    /// Region selection and verification mode
    pub transfer: TransferArgs,
    /// Suppress non-error output
    pub quiet: bool,
    /// Cleared by the Ctrl+C handler
    pub cancel_flag: Arc<AtomicBool>,
}

/// Execute the verify command
pub fn execute(args: VerifyArgs) -> Result<()> {
    let config = args.transfer.engine_config()?;
    let selector = args.transfer.selector()?;

    let device = args.device.open(false)?;
    let (device, regions) = resolve_regions(device, &selector)?;
    let volume = args.destination.open()?;

    let sink = TerminalSink::new(true, args.quiet);
    let running = args.cancel_flag.clone();
    let mut engine = TransferEngine::new(device, volume, &sink, config)
        .context("Invalid engine configuration")?
        .with_cancel_predicate(move || !running.load(Ordering::SeqCst));

    for region in &regions {
        let base = args.destination.base_for(region);
        if !args.quiet {
            println!(
                "{} {} against {}",
                style("Verifying").cyan().bold(),
                display_base(&args.destination.dest, &base),
                region.name
            );
        }

        let result = engine.verify_backup(region, &base);
        sink.finish();
        let report = result.with_context(|| format!("Failed to verify {}", region.name))?;

        if !report.verified {
            anyhow::bail!("Verification of {} was interrupted", region.name);
        }
        if !args.quiet {
            println!(
                "{} {} matches the device ({})",
                style("Success:").green(),
                region.name,
                format_duration(report.elapsed.as_secs())
            );
        }
    }

    Ok(())
}
