//! Command-line interface for nodewatch
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// nodewatch - testbed node health watchdog
#[derive(Parser)]
#[command(name = "nodewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (default: ./nodewatch.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Watch all hosts and power cycle the ones that stay unreachable
    Watch {
        /// Run a single poll cycle and exit
        #[arg(long)]
        once: bool,

        /// Log escalations without power cycling anything
        #[arg(long)]
        dry_run: bool,

        /// Seconds between poll cycles
        #[arg(short, long)]
        interval: Option<u64>,

        /// Consecutive failed checks before the first reboot
        #[arg(long)]
        failure_limit: Option<u32>,

        /// Failed checks after a reboot before rebooting again
        #[arg(long)]
        reboot_limit: Option<u32>,
    },

    /// Run one reachability probe and show per-host status
    Probe {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the materialization this machine is attached to
    Session {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Power cycle a single node
    Reboot {
        /// Node name
        host: String,

        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "nodewatch", &mut std::io::stdout());
    }
}
