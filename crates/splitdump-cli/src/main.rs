//! Splitdump - Resumable, verified backups of eMMC areas onto small media
//!
//! # Usage
//!
//! ```bash
//! # Show the areas and partitions of a device
//! splitdump list --device /dev/mmcblk0
//!
//! # Back up both boot partitions to an SD card
//! splitdump dump --device /dev/mmcblk0 --dest /media/sd --region boot
//!
//! # Back up the whole device; run again after emptying the card to continue
//! splitdump dump --device /dev/mmcblk0 --dest /media/sd --region raw
//!
//! # Write a backup back
//! splitdump restore --device /dev/mmcblk0 --dest /media/sd --region PRODINFO
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;

use commands::{DestinationArgs, DeviceArgs, TransferArgs};

/// Splitdump - Resumable, verified backups of eMMC areas onto small media
#[derive(Parser)]
#[command(name = "splitdump")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Suppress ALL output (implies --quiet and --yes)
    #[arg(long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the hardware areas and partitions of a device
    List {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Back up regions of a device to a destination directory
    Dump {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        destination: DestinationArgs,

        #[command(flatten)]
        transfer: TransferArgs,

        /// Skip confirmation prompts
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Write a backup from the destination directory back to the device
    Restore {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        destination: DestinationArgs,

        #[command(flatten)]
        transfer: TransferArgs,

        /// Skip confirmation prompts (use with caution!)
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Compare a backup on the destination with the device
    Verify {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        destination: DestinationArgs,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Re-hash a backup file against its digest log, without a device
    CheckLog {
        /// Backup file next to its .sha256sums log
        file: PathBuf,
    },

    /// Show or initialize the configuration file
    Config {
        /// Create a configuration file with default values
        #[arg(long)]
        init: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Use this configuration file instead of the default
        #[arg(long, env = "SPLITDUMP_CONFIG", value_name = "FILE")]
        config_file: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    // Set up panic handler for nicer error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        // Show cause chain in verbose mode
        if std::env::var("RUST_BACKTRACE").is_ok() {
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  {} {}", style("Caused by:").yellow(), cause);
                source = cause.source();
            }
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // --silent implies --quiet (no logs at all, not even errors to tracing)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet || cli.silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let silent = cli.silent;
    let quiet = cli.quiet || silent;

    // Set up Ctrl+C handler (suppress messages in silent mode)
    let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        if !r.load(std::sync::atomic::Ordering::SeqCst) {
            // Second Ctrl+C, force exit
            if !silent {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        r.store(false, std::sync::atomic::Ordering::SeqCst);
        if !silent {
            eprintln!(
                "\n{}",
                style("Cancelling... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;

    match cli.command {
        Commands::List { device, json } => commands::list::execute(&device, json, silent),
        Commands::Dump {
            device,
            destination,
            transfer,
            yes,
        } => commands::dump::execute(commands::dump::DumpArgs {
            device,
            destination,
            transfer,
            skip_confirm: yes || silent, // --silent implies --yes
            quiet,
            cancel_flag: running,
        }),
        Commands::Restore {
            device,
            destination,
            transfer,
            yes,
        } => commands::restore::execute(commands::restore::RestoreArgs {
            device,
            destination,
            transfer,
            skip_confirm: yes || silent,
            quiet,
            cancel_flag: running,
        }),
        Commands::Verify {
            device,
            destination,
            transfer,
        } => commands::verify::execute(commands::verify::VerifyArgs {
            device,
            destination,
            transfer,
            quiet,
            cancel_flag: running,
        }),
        Commands::CheckLog { file } => commands::check_log::execute(&file, quiet),
        Commands::Config {
            init,
            path,
            json,
            config_file,
        } => commands::config::execute(commands::config::ConfigArgs {
            init,
            path,
            json,
            silent,
            config_file,
        }),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}
