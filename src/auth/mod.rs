//! Multi-party authorization of inbound packets.
//!
//! - `verdict` - Turn-sealed shared output written by one extension at a time
//! - `barrier` - Joins the parties of one authorization into a single result
//! - `extension` - Authorizer traits, extension registry and per-client cache
//! - `pipeline` - Admission of PUBLISH, Will and SUBSCRIBE packets

pub mod barrier;
pub mod extension;
pub mod pipeline;
pub mod verdict;

pub use barrier::*;
pub use extension::*;
pub use pipeline::*;
pub use verdict::*;
