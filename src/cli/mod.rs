//! broker-core CLI.
//!
//! - `broker-core check-config` - Validate a configuration file
//! - `broker-core inspect` - List payloads in a file-backed store

mod args;
pub mod commands;

pub use args::{CheckConfigArgs, Cli, Commands, InspectArgs, OutputFormat};
