//! Shared utilities across akbuild modules.

pub mod files;

pub use files::{copy_dir_all, empty_dir, write_file_mode};
