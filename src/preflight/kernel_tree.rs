//! Checks on the kernel source tree.

use std::path::Path;

use crate::build::kernel::{defconfig_target, ARCH};
use crate::process;

use super::types::CheckResult;

pub fn check_kernel_tree(kernel_source: &Path, device: &str) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if !kernel_source.is_dir() {
        results.push(CheckResult::fail(
            "Kernel source",
            &format!("{} is not a directory. Set KERNEL_SOURCE.", kernel_source.display()),
        ));
        return results;
    }

    let makefile = kernel_source.join("Makefile");
    if makefile.is_file() {
        results.push(CheckResult::pass_with("Kernel Makefile", &makefile.display().to_string()));
    } else {
        results.push(CheckResult::fail(
            "Kernel Makefile",
            &format!("{} not found. Is KERNEL_SOURCE a kernel tree?", makefile.display()),
        ));
    }

    let config_tool = kernel_source.join("scripts/config");
    if process::is_executable(&config_tool) {
        results.push(CheckResult::pass("scripts/config"));
    } else if config_tool.exists() {
        results.push(CheckResult::fail(
            "scripts/config",
            &format!("{} is not executable", config_tool.display()),
        ));
    } else {
        results.push(CheckResult::fail(
            "scripts/config",
            &format!("{} not found", config_tool.display()),
        ));
    }

    // Vendor trees sometimes keep defconfigs elsewhere; make has the final say.
    let target = defconfig_target(device);
    let defconfig = kernel_source.join("arch").join(ARCH).join("configs").join(&target);
    if defconfig.is_file() {
        results.push(CheckResult::pass(&target));
    } else {
        results.push(CheckResult::warn(
            &target,
            &format!("Not found at {}", defconfig.display()),
        ));
    }

    results
}
