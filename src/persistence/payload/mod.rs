//! Deduplicated, reference-counted payload storage.
//!
//! - `backend` - Durable backends (`LocalPayloadStore`): in-memory and file-per-payload
//! - `cache` - Size-bounded, expire-after-access payload cache
//! - `store` - The payload store: dedup, reads, reference bookkeeping
//! - `sweeper` - Deferred deletion of zero-count payloads
//! - `error` - Payload and backend errors

pub mod backend;
pub mod cache;
pub mod error;
pub mod store;
pub mod sweeper;

pub use backend::*;
pub use cache::*;
pub use error::*;
pub use store::*;
pub use sweeper::*;

use crate::config::PayloadConfig;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Build the backend selected by `payload.storage_dir`.
pub fn open_backend(config: &PayloadConfig) -> Result<Arc<dyn LocalPayloadStore>> {
    match &config.storage_dir {
        Some(dir) => {
            let backend = FilePayloadBackend::open(dir)
                .with_context(|| format!("unable to open payload directory {}", dir.display()))?;
            Ok(Arc::new(backend))
        }
        None => Ok(Arc::new(MemoryPayloadBackend::new())),
    }
}
