//! Check-config command - loads a configuration file and reports the
//! effective settings.

use crate::cli::args::{CheckConfigArgs, OutputFormat};
use crate::config::Config;
use anyhow::Result;
use serde_json::json;

pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    config.validate()?;
    let payload = &config.payload;
    let auth = &config.auth;
    match args.format {
        OutputFormat::Json => {
            let summary = json!({
                "config": args.config.display().to_string(),
                "valid": true,
                "payload": {
                    "storage_dir": payload.storage_dir.as_ref().map(|d| d.display().to_string()),
                    "cache_max_entries": payload.cache_max_entries,
                    "cache_ttl_ms": payload.cache_ttl_ms,
                    "bucket_count": payload.bucket_count,
                    "cleanup_schedule_ms": payload.cleanup_schedule_ms,
                    "cleanup_delay_ms": payload.cleanup_delay_ms,
                    "cleanup_threads": payload.cleanup_threads,
                },
                "auth": {
                    "allow_dollar_topics": auth.allow_dollar_topics,
                    "default_async_timeout_ms": auth.default_async_timeout_ms,
                    "max_async_timeout_ms": auth.max_async_timeout_ms,
                },
                "log_level": config.telemetry.log_level,
            });
            println!("{summary}");
        }
        OutputFormat::Text => {
            println!("{} is valid", args.config.display());
            match &payload.storage_dir {
                Some(dir) => println!("  payload storage: {}", dir.display()),
                None => println!("  payload storage: in-memory"),
            }
            println!(
                "  cache: {} entries, ttl {}ms",
                payload.cache_max_entries, payload.cache_ttl_ms
            );
            println!(
                "  sweeper: {} shards every {}ms, grace {}ms",
                payload.cleanup_threads, payload.cleanup_schedule_ms, payload.cleanup_delay_ms
            );
            println!(
                "  auth: dollar topics {}, async timeout {}ms (max {}ms)",
                if auth.allow_dollar_topics { "allowed" } else { "refused" },
                auth.default_async_timeout_ms,
                auth.max_async_timeout_ms
            );
        }
    }
    Ok(())
}
