//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "trackmate")]
#[command(author, version, about = "CLI for TrackMate BLE item trackers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby tracker tags
    Scan {
        /// Scan window in seconds
        #[arg(short, long, default_value = "10")]
        window: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to a tag and stream its telemetry
    Watch {
        /// Device id or advertised name, or use TRACKMATE_DEVICE env var
        #[arg(short, long, env = "TRACKMATE_DEVICE")]
        device: String,

        /// Scan window in seconds while locating the tag
        #[arg(short, long, default_value = "10")]
        window: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}
