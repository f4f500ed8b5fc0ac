//! Host tool availability checks.

use crate::process;

use super::types::CheckResult;

/// Tools the build shells out to, with the reason each is needed.
pub const REQUIRED_TOOLS: [(&str, &str); 4] = [
    ("make", "Required to configure and build the kernel"),
    ("git", "Required for the source revision and the packaging template"),
    ("zip", "Required to create the flashable archive"),
    ("bash", "Required to run KernelSU setup scripts"),
];

pub fn check_host_tools(use_ccache: bool) -> Vec<CheckResult> {
    let mut results: Vec<CheckResult> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, purpose)| check_tool(tool, purpose, true))
        .collect();

    if use_ccache {
        results.push(check_tool(
            "ccache",
            "Optional, builds run uncached without it (or pass --noccache)",
            false,
        ));
    }
    results
}

fn check_tool(tool: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => {
            let msg = format!("Not found in PATH. {}", purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
