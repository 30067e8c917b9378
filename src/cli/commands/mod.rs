//! CLI command implementations.

mod check_config;
mod inspect;

pub use check_config::run_check_config;
pub use inspect::run_inspect;
