//! Operations and observability.
//!
//! - `telemetry` - JSON tracing setup with a reloadable filter
//! - `audit` - Audit trail of refused and disconnected clients

pub mod audit;
pub mod telemetry;

pub use audit::*;
pub use telemetry::*;
