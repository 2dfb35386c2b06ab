// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

/// Command-line arguments for `seqdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "seqdag",
    version,
    about = "Watch a sequencer output tree and drive each project through its task graph.",
    long_about = None
)]
pub struct CliArgs {
    /// What to do.
    #[arg(short, long, value_enum, default_value_t = Action::Report)]
    pub action: Action,

    /// Path to the config file (TOML).
    ///
    /// Default: `seqdag.toml` in the current directory if it exists,
    /// built-in defaults otherwise.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Never start tasks; `install` only prints what it would do.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// More log output (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,
}

/// Top-level action selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Run the daemon: discover, schedule and execute until interrupted.
    Process,
    /// Discover once and print the status table.
    Report,
    /// Create the configured directories and print a service unit.
    Install,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
