//! CLI argument parsing.

mod args;
mod validators;

pub use args::{Cli, Command, ConfigAction, DetectorsAction, GlobalArgs, ServeArgs};
pub use validators::{parse_detector_id, parse_workers};
