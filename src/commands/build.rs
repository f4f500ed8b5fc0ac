//! Build command - runs every requested system pass end to end.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::build::kernel;
use crate::config::Config;
use crate::download::{Fetch, HttpFetcher};
use crate::dts;
use crate::kconfig;
use crate::kernelsu::KsuSetup;
use crate::options::{BuildConfig, KsuVariant, SystemPass};
use crate::package::{self, ArchiveName, KpmOutcome, PackageRequest};
use crate::preflight;
use crate::timing::format_duration;
use crate::toolchain::BuildEnvironment;

/// What one system pass produced.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub system: SystemPass,
    pub archive: PathBuf,
    pub sha256: String,
    pub kpm: KpmOutcome,
    /// Device-tree blobs packed; 0 means an empty dtb was shipped.
    pub dtb_count: usize,
    pub compile_time: Duration,
}

/// Execute the build command.
pub fn cmd_build(base_dir: &Path, config: &Config, build: &BuildConfig) -> Result<()> {
    let start = Instant::now();

    preflight::run_preflight_or_fail(&config.kernel_source, &build.device, build.ccache)?;
    let fetcher = HttpFetcher::new()?;
    let reports = run_build(base_dir, config, build, &fetcher)?;

    println!("\n=== Build complete ===");
    for report in &reports {
        println!("  {}: {}", report.system.label(), report.archive.display());
    }
    println!("  Total time: {}", format_duration(start.elapsed()));
    Ok(())
}

/// Everything after preflight. Archives are written to `base_dir`.
///
/// The first error aborts the remaining passes.
pub fn run_build(
    base_dir: &Path,
    config: &Config,
    build: &BuildConfig,
    fetcher: &dyn Fetch,
) -> Result<Vec<PassReport>> {
    let kernel_source = config.kernel_source.as_path();
    let env = BuildEnvironment::resolve(config, build.ccache)?;
    let revision = kernel::source_revision(kernel_source);
    println!("  Revision: {}", revision);

    println!("\nSetting up KernelSU...");
    let mut ksu = KsuSetup::new();
    let ksu_label = ksu.run(kernel_source, build, fetcher)?;

    let mut reports = Vec::new();
    for pass in build.system.passes() {
        println!("\n=== {} build for {} ({}) ===", pass.label(), build.device, ksu_label);
        let report = run_pass(
            base_dir,
            config,
            build,
            &env,
            pass,
            &revision,
            &ksu_label,
            fetcher,
        )?;
        print_summary(&report, &ksu_label);
        reports.push(report);
    }
    Ok(reports)
}

#[allow(clippy::too_many_arguments)]
fn run_pass(
    base_dir: &Path,
    config: &Config,
    build: &BuildConfig,
    env: &BuildEnvironment,
    pass: SystemPass,
    revision: &str,
    ksu_label: &str,
    fetcher: &dyn Fetch,
) -> Result<PassReport> {
    let kernel_source = config.kernel_source.as_path();

    // Held until the pass ends; dropping it on an error path restores too.
    let dts_backup = match pass {
        SystemPass::Miui => dts::patch_for_miui(kernel_source)?,
        SystemPass::Aosp => None,
    };

    let out_dir = kernel_source.join(kernel::output_dir_name(&build.device, revision));
    kernel::prepare_output_dir(&out_dir, build.skip_clean)?;

    let config_file = kernel::generate_config(
        kernel_source,
        env,
        &out_dir,
        &build.device,
        &build.extra_make_args,
    )?;
    kconfig::apply(kernel_source, &config_file, &kconfig::plan(pass, build))?;
    let compile_time = kernel::compile(kernel_source, env, &out_dir, &build.extra_make_args)?;

    let request = PackageRequest {
        out_dir: &out_dir,
        work_dir: base_dir,
        name: ArchiveName {
            system: pass,
            device: build.device.clone(),
            ksu_label: ksu_label.to_string(),
            timestamp: package::timestamp_now(),
            revision: revision.to_string(),
        },
        kpm_patch: build.features().kpm && build.ksu == KsuVariant::SukisuUltra,
        template_url: &config.anykernel_url,
        template_branch: &config.anykernel_branch,
    };
    let packaged = package::package(&request, fetcher)?;

    if let Some(backup) = dts_backup {
        backup.restore()?;
    }

    Ok(PassReport {
        system: pass,
        archive: packaged.archive,
        sha256: packaged.sha256,
        kpm: packaged.kpm,
        dtb_count: packaged.dtb_count,
        compile_time,
    })
}

fn print_summary(report: &PassReport, ksu_label: &str) {
    println!("\n--- {} summary ---", report.system.label());
    println!("  Archive:  {}", report.archive.display());
    println!("  SHA-256:  {}", report.sha256);
    println!("  KernelSU: {}", ksu_label);
    match &report.kpm {
        KpmOutcome::NotRequested => {}
        KpmOutcome::Applied => println!("  KPM:      applied"),
        KpmOutcome::SkippedDegraded(reason) => println!("  KPM:      skipped ({})", reason),
    }
    if report.dtb_count == 0 {
        println!("  DTBs:     0 (empty dtb packaged)");
    } else {
        println!("  DTBs:     {}", report.dtb_count);
    }
    println!("  Compile:  {}", format_duration(report.compile_time));
}
