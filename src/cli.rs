//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_PATH;

/// Alert lifecycle and escalation daemon.
#[derive(Parser, Debug)]
#[command(name = "escalert", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "ESCALERT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, env = "ESCALERT_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub check_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
