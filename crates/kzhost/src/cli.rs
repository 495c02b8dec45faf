//! Command-line interface of the kzhost supervisor.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments; each option overrides its config file setting.
#[derive(Debug, Clone, Parser)]
#[command(name = "kzhost", version, about = "Counter-Strike 2 dedicated server supervisor")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "kzhost.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Install or update the server, sync plugins, run until interrupted
    Run,
    /// Install and activate plugins, then exit
    Plugins,
    /// Print the plugin installation order and exit
    Order,
}
