//! akbuild library exports.
//!
//! The binary is a thin wrapper over [`commands::cmd_build`]; everything
//! is public so integration tests can drive individual stages.

pub mod build;
pub mod commands;
pub mod common;
pub mod config;
pub mod download;
pub mod dts;
pub mod error;
pub mod kconfig;
pub mod kernelsu;
pub mod options;
pub mod package;
pub mod preflight;
pub mod process;
pub mod timing;
pub mod toolchain;
