//! Payload directory inspection.

use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::Config;
use crate::persistence::{content_hash, FilePayloadBackend, LocalPayloadStore};
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::path::PathBuf;

pub fn run_inspect(args: InspectArgs) -> Result<()> {
    let dir = resolve_dir(&args)?;
    let backend = FilePayloadBackend::open(&dir)
        .with_context(|| format!("unable to open payload directory {}", dir.display()))?;
    let mut ids = backend
        .enumerate_ids()
        .with_context(|| format!("unable to list payloads in {}", dir.display()))?;
    ids.sort();

    let mut total_bytes = 0u64;
    let mut unreadable = 0usize;
    for id in &ids {
        let payload = match backend.read(*id) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(err) => {
                unreadable += 1;
                eprintln!("payload {id}: {err}");
                continue;
            }
        };
        total_bytes += payload.len() as u64;
        let hash = args.hashes.then(|| format!("{:016x}", content_hash(&payload)));
        match args.format {
            OutputFormat::Json => {
                println!("{}", json!({ "id": id.get(), "bytes": payload.len(), "hash": hash }));
            }
            OutputFormat::Text => match hash {
                Some(hash) => println!("{:>20}  {:>10} bytes  {hash}", id.get(), payload.len()),
                None => println!("{:>20}  {:>10} bytes", id.get(), payload.len()),
            },
        }
    }

    match args.format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "dir": dir.display().to_string(),
                "payloads": ids.len(),
                "bytes": total_bytes,
                "unreadable": unreadable,
            })
        ),
        OutputFormat::Text => println!(
            "{} payloads, {total_bytes} bytes, {unreadable} unreadable in {}",
            ids.len(),
            dir.display()
        ),
    }
    Ok(())
}

fn resolve_dir(args: &InspectArgs) -> Result<PathBuf> {
    if let Some(dir) = &args.dir {
        return Ok(dir.clone());
    }
    let config = Config::load(&args.config)?;
    config.payload.storage_dir.ok_or_else(|| {
        anyhow!(
            "no --dir given and {} has no payload.storage_dir",
            args.config.display()
        )
    })
}
