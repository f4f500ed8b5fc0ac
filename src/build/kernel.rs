//! Kernel configuration and compilation.
//!
//! `make` runs twice per pass with the same argument template: once with
//! `<device>_defconfig` to materialize `.config` in the output directory,
//! once with no target to build the image and device trees.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::Cmd;
use crate::timing::Timer;
use crate::toolchain::BuildEnvironment;

pub const ARCH: &str = "arm64";
pub const CLANG_TRIPLE: &str = "aarch64-linux-gnu-";
pub const CROSS_COMPILE: &str = "aarch64-linux-gnu-";
pub const CROSS_COMPILE_ARM32: &str = "arm-linux-gnueabi-";

/// Revision used when the tree is not a git checkout.
pub const UNKNOWN_REVISION: &str = "unknown";

pub fn defconfig_target(device: &str) -> String {
    format!("{}_defconfig", device)
}

/// `out_<device>_<revision>`
pub fn output_dir_name(device: &str, revision: &str) -> String {
    format!("out_{}_{}", device, revision)
}

/// Short hash of the kernel tree's HEAD, or `unknown`.
pub fn source_revision(kernel_source: &Path) -> String {
    let result = Cmd::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .dir(kernel_source)
        .allow_fail()
        .run();

    match result {
        Ok(r) if r.success() && !r.stdout_trimmed().is_empty() => r.stdout_trimmed().to_string(),
        _ => {
            eprintln!(
                "  [WARN] {} is not a git checkout, using revision '{}'",
                kernel_source.display(),
                UNKNOWN_REVISION
            );
            UNKNOWN_REVISION.to_string()
        }
    }
}

/// Create or reuse the output directory.
///
/// Returns true if an existing directory was reused. Asking to reuse a
/// directory that does not exist falls back to a clean build.
pub fn prepare_output_dir(out_dir: &Path, skip_clean: bool) -> Result<bool> {
    if skip_clean {
        if out_dir.is_dir() {
            println!("  Reusing {}", out_dir.display());
            return Ok(true);
        }
        eprintln!(
            "  [WARN] {} does not exist, doing a clean build",
            out_dir.display()
        );
    }

    if out_dir.exists() {
        println!("  Cleaning {}...", out_dir.display());
        fs::remove_dir_all(out_dir)
            .with_context(|| format!("Failed to remove {}", out_dir.display()))?;
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    Ok(false)
}

/// Argument template shared by every `make` invocation.
pub fn make_args(
    env: &BuildEnvironment,
    out_dir: &Path,
    extra: &[String],
    target: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        format!("O={}", out_dir.display()),
        format!("ARCH={}", ARCH),
        format!("CC={}", env.compiler()),
        format!("CLANG_TRIPLE={}", CLANG_TRIPLE),
        format!("CROSS_COMPILE={}", CROSS_COMPILE),
        format!("CROSS_COMPILE_ARM32={}", CROSS_COMPILE_ARM32),
        "LD=ld.lld".to_string(),
        "AR=llvm-ar".to_string(),
        "NM=llvm-nm".to_string(),
        "OBJCOPY=llvm-objcopy".to_string(),
        "OBJDUMP=llvm-objdump".to_string(),
        "STRIP=llvm-strip".to_string(),
        format!("-j{}", env.jobs),
    ];
    args.extend(extra.iter().cloned());
    if let Some(target) = target {
        args.push(target.to_string());
    }
    args
}

fn make(kernel_source: &Path, env: &BuildEnvironment, args: Vec<String>) -> Cmd {
    Cmd::new("make")
        .args(args)
        .dir(kernel_source)
        .envs(env.child_env())
}

/// Run `<device>_defconfig`; returns the generated `.config`.
pub fn generate_config(
    kernel_source: &Path,
    env: &BuildEnvironment,
    out_dir: &Path,
    device: &str,
    extra: &[String],
) -> Result<PathBuf> {
    let target = defconfig_target(device);
    println!("  Generating config from {}...", target);
    make(kernel_source, env, make_args(env, out_dir, extra, Some(&target)))
        .error_msg(format!("make {} failed", target))
        .run()?;

    let config_path = out_dir.join(".config");
    if !config_path.exists() {
        bail!(
            "make {} succeeded but {} was not created",
            target,
            config_path.display()
        );
    }
    Ok(config_path)
}

/// Build the kernel. Returns how long compilation took.
pub fn compile(
    kernel_source: &Path,
    env: &BuildEnvironment,
    out_dir: &Path,
    extra: &[String],
) -> Result<Duration> {
    println!("  Building kernel with {} jobs...", env.jobs);
    let timer = Timer::start("Kernel compilation");
    make(kernel_source, env, make_args(env, out_dir, extra, None))
        .error_msg("Kernel build failed")
        .run_interactive()?;
    Ok(timer.finish())
}
