//! List command - displays the hardware areas and partitions of a device

use super::{format_bytes, read_partitions, DeviceArgs};
use anyhow::{Context, Result};
use console::style;
use splitdump_core::{Area, BlockDevice, Region, SECTOR_SIZE};

/// Execute the list command
pub fn execute(args: &DeviceArgs, json: bool, silent: bool) -> Result<()> {
    let device = args.open(false)?;
    let (device, partitions) = read_partitions(device)?;

    let areas: Vec<(Area, u64)> = [Area::Boot0, Area::Boot1, Area::UserData]
        .into_iter()
        .map(|area| (area, device.area_sectors(area)))
        .filter(|(_, sectors)| *sectors > 0)
        .collect();

    // JSON output mode - always output even in silent mode (it's machine-readable)
    if json {
        println!("{}", to_json(&areas, &partitions)?);
        return Ok(());
    }

    if silent {
        return Ok(());
    }

    println!(
        "{} {}\n",
        style("Device").green().bold(),
        args.device.display()
    );

    println!("{}", style("Hardware areas").bold());
    for (area, sectors) in &areas {
        println!(
            "  {:<6} {:>12} sectors  {}",
            area.to_string(),
            sectors,
            style(format_bytes(sectors * u64::from(SECTOR_SIZE))).dim()
        );
    }
    println!();

    if partitions.is_empty() {
        println!("No partition table found in the user area.");
        println!(
            "{}",
            style("Tip: Use --region raw to dump the whole user area").dim()
        );
        return Ok(());
    }

    println!("{} ({})", style("Partitions").bold(), partitions.len());
    for region in &partitions {
        print_region(region);
    }

    Ok(())
}

fn print_region(region: &Region) {
    println!(
        "  {:<16} {:#010X} - {:#010X}  {}",
        region.name,
        region.lba_start,
        region.lba_end,
        style(format_bytes(region.byte_len(SECTOR_SIZE))).dim()
    );
}

/// Machine-readable listing
fn to_json(areas: &[(Area, u64)], partitions: &[Region]) -> Result<String> {
    let areas: Vec<_> = areas
        .iter()
        .map(|(area, sectors)| {
            serde_json::json!({
                "area": area,
                "sectors": sectors,
                "bytes": sectors * u64::from(SECTOR_SIZE),
            })
        })
        .collect();

    serde_json::to_string_pretty(&serde_json::json!({
        "areas": areas,
        "partitions": partitions,
    }))
    .context("Failed to serialize device layout")
}
