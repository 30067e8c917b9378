//! MQTT-facing types for the admission path.
//!
//! - `packet` - PUBLISH/SUBSCRIBE/Will model, reason codes and admission actions
//! - `topics` - Topic name and filter validation

pub mod packet;
pub mod topics;

pub use packet::*;
pub use topics::*;
