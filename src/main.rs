//! broker-core - operator CLI entrypoint.
//!
//! Usage:
//!   broker-core check-config --config config/broker-core.toml
//!   broker-core inspect --dir /var/lib/broker/payloads

use anyhow::Result;
use broker_core::cli::commands::{run_check_config, run_inspect};
use broker_core::cli::{Cli, Commands};
use broker_core::telemetry;
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = std::env::var("BROKER_CORE_LOG_LEVEL").ok();
    let _log_handle = telemetry::init_tracing(Some(level.as_deref().unwrap_or("warn")))?;

    match cli.command {
        Commands::CheckConfig(args) => run_check_config(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}
