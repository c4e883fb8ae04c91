//! Terminal front end for the engine's progress, messages and prompts

use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use splitdump_core::{Level, Phase, ProgressSink, Prompt, TransferProgress};

/// [`ProgressSink`] drawing an `indicatif` bar and asking with `dialoguer`
pub struct TerminalSink {
    bar: ProgressBar,
    assume_yes: bool,
    quiet: bool,
}

impl TerminalSink {
    /// Sink for an interactive terminal; `quiet` hides the bar and info lines
    pub fn new(assume_yes: bool, quiet: bool) -> Self {
        Self {
            bar: create_progress_bar(quiet),
            assume_yes,
            quiet,
        }
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for TerminalSink {
    fn progress(&self, progress: &TransferProgress) {
        let percent = u64::from(progress.percent);
        if self.bar.is_finished() || percent < self.bar.position() {
            self.bar.reset();
        }
        self.bar.set_message(progress_message(progress));
        self.bar.set_position(percent);
    }

    fn message(&self, level: Level, text: &str) {
        match level {
            Level::Info if !self.quiet => {
                self.bar
                    .suspend(|| println!("{} {}", style("Info:").cyan(), text));
            }
            Level::Info => {}
            Level::Warn => {
                self.bar
                    .suspend(|| eprintln!("{} {}", style("Warning:").yellow(), text));
            }
            // Errors come back as the command result and are printed once by main
            Level::Error => tracing::debug!("{}", text),
        }
    }

    fn confirm(&self, prompt: &Prompt) -> bool {
        if self.assume_yes {
            tracing::debug!(%prompt, "Assuming yes");
            return true;
        }

        self.bar.suspend(|| {
            Confirm::new()
                .with_prompt(prompt.to_string())
                .default(false)
                .interact()
                .unwrap_or(false)
        })
    }
}

fn progress_message(progress: &TransferProgress) -> String {
    let phase = match progress.phase {
        Phase::Transfer => "Copying",
        Phase::Verify => "Verifying",
    };
    if progress.part_index > 0 {
        format!("{} {} (part {})", phase, progress.region, progress.part_index)
    } else {
        format!("{} {}", phase, progress.region)
    }
}

fn create_progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    pb.set_style(style);
    pb
}
