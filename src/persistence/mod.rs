//! Payload persistence.
//!
//! - `bucket_lock` - Partitioned locking keyed by payload id
//! - `reference_counter` - Bucket-locked reference counters
//! - `payload` - Deduplicated payload store, cache, backends and the deletion sweeper

pub mod bucket_lock;
pub mod payload;
pub mod reference_counter;

pub use bucket_lock::*;
pub use payload::*;
pub use reference_counter::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a stored payload. Messages carry this instead of the bytes.
///
/// Ids are 63-bit so they survive a round trip through signed storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadId(u64);

impl PayloadId {
    pub const MAX: u64 = i64::MAX as u64;

    /// Returns `None` when `raw` does not fit in 63 bits.
    pub fn new(raw: u64) -> Option<Self> {
        (raw <= Self::MAX).then_some(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
