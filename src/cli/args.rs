//! CLI argument definitions.

use super::validators::{parse_detector_id, parse_workers};
use crate::config::LogFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Edge inference node: answers image queries locally and escalates to the cloud.
#[derive(Debug, Parser)]
#[command(name = "edgelens")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Configuration file (default: platform config directory).
    #[arg(long, global = true, env = "EDGELENS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log line format (overrides config).
    #[arg(long, global = true, value_enum, env = "EDGELENS_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase verbosity (-v: debug, -vv: trace, -vvv: trace including ONNX Runtime).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP node.
    Serve(ServeArgs),
    /// Run one query in-process and print the JSON response.
    Query {
        /// Detector to ask.
        #[arg(value_parser = parse_detector_id)]
        detector_id: String,
        /// Image file.
        image: PathBuf,
        /// Let the cloud answer and return immediately.
        #[arg(long = "async")]
        want_async: bool,
    },
    /// Manage configuration.
    Config {
        /// Configuration action to perform.
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect configured detectors.
    Detectors {
        /// Detectors action to perform.
        #[command(subcommand)]
        action: DetectorsAction,
    },
}

/// Options for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Bind host (overrides config).
    #[arg(long, env = "EDGELENS_HOST")]
    pub host: Option<String>,

    /// Bind port (overrides config).
    #[arg(short, long, env = "EDGELENS_PORT")]
    pub port: Option<u16>,

    /// Worker count (overrides config).
    #[arg(long, value_parser = parse_workers, env = "EDGELENS_WORKERS")]
    pub workers: Option<usize>,
}

/// Config subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Create default configuration file.
    Init,
    /// Display current configuration.
    Show,
    /// Print configuration file path.
    Path,
}

/// Detectors subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum DetectorsAction {
    /// List configured detectors.
    List,
    /// Validate every detector, failing if any is invalid.
    Check,
}
