//! Configuration file management command

use anyhow::{Context, Result};
use console::style;
use splitdump_core::Settings;
use std::path::PathBuf;

/// Arguments for the config command
pub struct ConfigArgs {
    /// Initialize a new configuration file with defaults
    pub init: bool,
    /// Show the path to the configuration file
    pub path: bool,
    /// Show configuration in JSON format
    pub json: bool,
    /// Suppress output (for scripting)
    pub silent: bool,
    /// Custom configuration file path (overrides default)
    pub config_file: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    let config_path = args.config_file.clone().or_else(Settings::config_path);

    if args.path {
        if let Some(path) = &config_path {
            if !args.silent {
                println!("{}", path.display());
            }
        } else if !args.silent {
            eprintln!("{}", style("Could not determine config path").yellow());
        }
        return Ok(());
    }

    if args.init {
        return init_config(config_path, args.silent);
    }

    show_config(config_path, args.json, args.silent)
}

/// Write a configuration file with default values
fn init_config(config_path: Option<PathBuf>, silent: bool) -> Result<()> {
    let path = config_path.context("Could not determine configuration directory")?;

    if path.exists() {
        if !silent {
            eprintln!(
                "{} Configuration file already exists at: {}",
                style("Warning:").yellow(),
                path.display()
            );
            eprintln!("Use a text editor to modify it, or delete it to re-initialize.");
        }
        return Ok(());
    }

    let saved_path = Settings::default()
        .save_to_path(Some(path))
        .context("Failed to save configuration file")?;

    if !silent {
        println!(
            "{} Created configuration file at: {}",
            style("Success:").green(),
            saved_path.display()
        );
        println!();
        println!("Example settings:");
        println!();
        println!("  [transfer]");
        println!("  verification = \"full\"   # Re-read every chunk");
        println!("  part_size = \"1G\"        # Fixed part size");
        println!();
        println!("  [retry]");
        println!("  attempts = 5");
    }

    Ok(())
}

/// Print the effective settings
fn show_config(config_path: Option<PathBuf>, json: bool, silent: bool) -> Result<()> {
    if silent {
        return Ok(());
    }

    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let settings = Settings::load_from_path(config_path.clone());

    if json {
        let json_output = serde_json::to_string_pretty(&settings)
            .context("Failed to serialize settings to JSON")?;
        println!("{}", json_output);
        return Ok(());
    }

    println!("{}", style("Splitdump Configuration").bold());
    println!();

    if let Some(path) = &config_path {
        if config_exists {
            println!("  {} {}", style("Config file:").dim(), path.display());
        } else {
            println!(
                "  {} {} {}",
                style("Config file:").dim(),
                path.display(),
                style("(not found, using defaults)").yellow()
            );
        }
    }
    println!();

    println!("{}", style("[transfer]").cyan());
    println!("  chunk_size = \"{}\"", settings.transfer.chunk_size);
    match &settings.transfer.part_size {
        Some(size) => println!("  part_size = \"{}\"", size),
        None => println!("  part_size = {}", style("(from destination size)").dim()),
    }
    println!("  verification = \"{}\"", settings.transfer.verification);
    println!("  naming = \"{}\"", settings.transfer.naming);
    println!();

    println!("{}", style("[retry]").cyan());
    println!("  attempts = {}", settings.retry.attempts);
    println!("  delay_ms = {}", settings.retry.delay_ms);
    println!();

    println!("{}", style("[behavior]").cyan());
    println!(
        "  skip_confirmation = {}",
        settings.behavior.skip_confirmation
    );
    println!("  quiet = {}", settings.behavior.quiet);

    if !config_exists {
        println!();
        println!(
            "{}",
            style("Run 'splitdump config --init' to create a configuration file.").dim()
        );
    }

    if let Err(e) = settings.engine_config() {
        println!();
        println!("{} {}", style("Warning:").yellow(), e);
    }

    Ok(())
}
