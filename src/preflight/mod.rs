//! Preflight checks run before anything touches the kernel tree.
//!
//! Every check is collected into a [`PreflightReport`] first so all
//! problems are shown at once instead of one per attempt.

mod host_tools;
mod kernel_tree;
mod types;

use std::path::Path;

use anyhow::{bail, Result};

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(kernel_source: &Path, device: &str, use_ccache: bool) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...");
    checks.extend(host_tools::check_host_tools(use_ccache));
    checks.extend(kernel_tree::check_kernel_tree(kernel_source, device));

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(kernel_source: &Path, device: &str, use_ccache: bool) -> Result<()> {
    let report = run_preflight(kernel_source, device, use_ccache);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }
    Ok(())
}
