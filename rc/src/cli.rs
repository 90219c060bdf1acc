//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// runclock - deadline and quota-retry timers for orchestrated runs
#[derive(Debug, Parser)]
#[command(
    name = "rc",
    about = "Deadline tracking and quota-retry backoff for orchestrated runs",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the quota-retry backoff for successive attempts
    Backoff {
        /// Number of attempts to show
        #[arg(short, long, default_value = "10")]
        attempts: u32,

        /// Seed for the jitter, for reproducible output
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Play a scenario of runs through the timers
    Simulate {
        /// Scenario YAML file
        #[arg(value_name = "SCENARIO")]
        scenario: PathBuf,
    },
}
