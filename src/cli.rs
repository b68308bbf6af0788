use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "reqlog", version, about = "Request logging and retention service")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Effective command, defaulting to `start` when none is given
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the request log server (default)
    Start,

    /// Display request log statistics
    Stats,

    /// Delete log records older than the retention window
    Cleanup {
        /// Retention window in hours (defaults to the configured value)
        #[arg(short = 'n', long)]
        hours: Option<u32>,
    },

    /// Test configuration file validity
    Test,

    /// Show version information
    Version,
}
