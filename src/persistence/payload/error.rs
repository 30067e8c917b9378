use crate::persistence::PayloadId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("payload backend I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload backend entry {entry} is corrupt: {reason}")]
    Corrupt { entry: String, reason: String },
    #[error("payload backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    /// A live message referenced a payload that is gone from cache and backend.
    #[error("payload {0} not found")]
    NotFound(PayloadId),
    #[error("payload {0} is already stored")]
    IdInUse(PayloadId),
    #[error("reference delta must be positive, got {0}")]
    InvalidDelta(i64),
    #[error("reference count of payload {id} cannot grow by {delta}")]
    CounterOverflow { id: PayloadId, delta: i64 },
    #[error("payload id space exhausted")]
    IdsExhausted,
    #[error("payload store is closed")]
    Closed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}
