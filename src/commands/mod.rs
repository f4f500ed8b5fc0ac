//! CLI command handlers.

pub mod build;

pub use build::{cmd_build, run_build, PassReport};
