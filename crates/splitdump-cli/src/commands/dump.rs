//! Dump command - backs up regions of a device to the destination

use super::{display_base, format_bytes, resolve_regions, DestinationArgs, DeviceArgs, TransferArgs};
use crate::progress::TerminalSink;
use anyhow::{Context, Result};
use console::style;
use splitdump_core::{format_duration, Outcome, TransferEngine, Volume, SECTOR_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Arguments for the dump command
pub struct DumpArgs {
    /// Source device
    pub device: DeviceArgs,
    /// Destination directory
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

/// Execute the dump command
pub fn execute(args: DumpArgs) -> Result<()> {
    let config = args.transfer.engine_config()?;
    let selector = args.transfer.selector()?;

    let device = args.device.open(false)?;
    let (device, regions) = resolve_regions(device, &selector)?;
    let volume = args.destination.open()?;

    if !args.quiet {
        println!("{}", style("Splitdump").bold());
        println!(
            "  {} {}",
            style("Source:").dim(),
            args.device.device.display()
        );
        println!(
            "  {} {} ({} {}, {} free)",
            style("Destination:").dim(),
            args.destination.dest.display(),
            volume.kind(),
            format_bytes(volume.total_bytes().unwrap_or(0)),
            format_bytes(volume.free_bytes().unwrap_or(0))
        );
        println!("  {} {}", style("Verification:").dim(), config.verify_mode);
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
                "{} {} ({}) -> {}",
                style("Dumping").cyan().bold(),
                region.name,
                format_bytes(region.byte_len(SECTOR_SIZE)),
                display_base(&args.destination.dest, &base)
            );
        }

        let result = engine.dump(region, &base);
        sink.finish();
        let report = result.with_context(|| format!("Failed to dump {}", region.name))?;

        match report.outcome {
            Outcome::Done => {
                if !args.quiet {
                    let verified = if report.verified {
                        style("verified").green().to_string()
                    } else {
                        style("not verified").yellow().to_string()
                    };
                    println!(
                        "{} {} in {}, {}",
                        style("Success:").green(),
                        region.name,
                        format_duration(report.elapsed.as_secs()),
                        verified
                    );
                }
            }
            Outcome::PartialAwaitingSpace { completed_parts } => {
                if !args.quiet {
                    println!(
                        "{} {} of {} parts of {} are on the destination.",
                        style("Paused:").yellow().bold(),
                        completed_parts,
                        report.part_count,
                        region.name
                    );
                }
                return Ok(());
            }
        }
    }

    Ok(())
}
