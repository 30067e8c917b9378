//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// broker-core - payload store and authorization tooling.
#[derive(Parser)]
#[command(name = "broker-core")]
#[command(version)]
#[command(about = "Operator tools for the broker payload store and admission settings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate a configuration file
    CheckConfig(CheckConfigArgs),

    /// List the payloads held by a file-backed payload store
    Inspect(InspectArgs),
}

/// Output format for command results.
#[derive(clap::ValueEnum, Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum OutputFormat {
    /// JSON objects, one per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

// -----------------------------------------------------------------------------
// Check-config command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to configuration file (TOML, or JSON by extension)
    #[arg(short, long, default_value = "config/broker-core.toml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

// -----------------------------------------------------------------------------
// Inspect command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct InspectArgs {
    /// Payload directory; defaults to `payload.storage_dir` from --config
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Configuration file used when --dir is not given
    #[arg(short, long, default_value = "config/broker-core.toml")]
    pub config: PathBuf,

    /// Also print the content hash used for deduplication
    #[arg(long, default_value_t = false)]
    pub hashes: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}
