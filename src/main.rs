//! akbuild - Android kernel build orchestrator.
//!
//! Configures, compiles and packages an arm64 kernel tree for AOSP and/or
//! MIUI, optionally with a KernelSU variant, SuSFS and KPM.

use anyhow::{Context, Result};

use akbuild::commands;
use akbuild::config::Config;
use akbuild::options::{self, ParseOutcome};

fn main() -> Result<()> {
    let (build, warnings) = match options::parse_args(std::env::args().skip(1))? {
        ParseOutcome::Help(text) => {
            println!("{}", text);
            return Ok(());
        }
        ParseOutcome::Build { config, warnings } => (config, warnings),
    };
    for warning in &warnings {
        eprintln!("[WARN] {}", warning);
    }

    let base_dir = std::env::current_dir().context("Failed to read the working directory")?;
    let config = Config::load(&base_dir);
    config.print();

    commands::cmd_build(&base_dir, &config, &build)
}
