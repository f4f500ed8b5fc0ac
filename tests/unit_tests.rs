//! Stage-level tests through the public API.
//!
//! Each test drives one stage (options, config, device trees, kconfig,
//! packaging) on its own, with fake tools where a stage shells out.

mod helpers;

use helpers::{create_script, snapshot, RecordingFetcher, TestEnv, PANEL_FILE};
use akbuild::config::Config;
use akbuild::dts;
use akbuild::error::OptionError;
use akbuild::kconfig;
use akbuild::kernelsu::{display_label, KsuSetup, KsuState};
use akbuild::options::{parse_args, Addon, BuildConfig, KsuVariant, ParseOutcome, SystemPass};
use akbuild::package::{self, ArchiveName, PackageRequest};
use regex::Regex;
use serial_test::serial;
use std::fs;

fn parse(args: &[&str]) -> (BuildConfig, Vec<String>) {
    match parse_args(args.iter().copied()).unwrap() {
        ParseOutcome::Build { config, warnings } => (config, warnings),
        ParseOutcome::Help(_) => panic!("unexpected help"),
    }
}

// =============================================================================
// Options
// =============================================================================

#[test]
fn test_ultra_susfs_kpm_flags() {
    let (config, warnings) = parse(&[
        "alioth", "--ksu", "sukisu-ultra", "--additional", "susfs-kpm", "--system", "miui",
    ]);
    let features = config.features();
    assert!(features.kernelsu && features.susfs && features.kpm);
    assert!(warnings.is_empty());
    assert_eq!(display_label(config.ksu, features.susfs), "SukiSU-Ultra_SuSFS");

    let groups = kconfig::plan(SystemPass::Miui, &config);
    let hook = groups.iter().find(|g| g.name == "manual hook").unwrap();
    assert_eq!(hook.directives, vec![kconfig::Directive::Enable(kconfig::MANUAL_HOOK)]);
}

#[test]
fn test_noksu_disables_everything() {
    let (config, _) = parse(&["munch", "--ksu", "noksu", "--system", "aosp", "--noccache"]);
    let features = config.features();
    assert!(!features.kernelsu && !features.susfs && !features.kpm);
    assert!(!config.ccache);

    let groups = kconfig::plan(SystemPass::Aosp, &config);
    assert!(groups
        .iter()
        .flat_map(|g| g.directives.iter())
        .all(|d| matches!(d, kconfig::Directive::Disable(_))));
}

#[test]
fn test_official_ksu_rejects_susfs() {
    let err = parse_args(["alioth", "--ksu", "ksu", "--additional", "susfs"]).unwrap_err();
    assert!(matches!(err, OptionError::IncompatibleVariant { .. }));
    // KPM alone is fine for the official variant
    let (config, _) = parse(&["alioth", "--ksu", "ksu", "--additional", "kpm"]);
    assert_eq!(config.addon, Addon::Kpm);
}

#[test]
fn test_addon_without_ksu_warns() {
    let (config, warnings) = parse(&["alioth", "--additional", "susfs"]);
    assert_eq!(config.ksu, KsuVariant::None);
    assert_eq!(warnings.len(), 1);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
#[serial]
fn test_environment_overrides_dotenv() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(".env"),
        "ANYKERNEL_BRANCH=from-dotenv\nCCACHE_DIR=/dotenv/ccache\n",
    )
    .unwrap();

    std::env::set_var("ANYKERNEL_BRANCH", "from-env");
    let config = Config::load(dir.path());
    std::env::remove_var("ANYKERNEL_BRANCH");

    assert_eq!(config.anykernel_branch, "from-env");
    if std::env::var_os("CCACHE_DIR").is_none() {
        assert_eq!(config.ccache_dir, std::path::PathBuf::from("/dotenv/ccache"));
    }
}

// =============================================================================
// Device trees
// =============================================================================

#[test]
fn test_dts_restored_byte_for_byte() {
    let env = TestEnv::new();
    env.create_kernel_tree();
    let before = snapshot(&env.dts_dir());

    let backup = dts::patch_for_miui(&env.kernel_source).unwrap().unwrap();
    let patched = fs::read_to_string(env.dts_dir().join(PANEL_FILE)).unwrap();
    assert!(patched.contains("<695>"));
    assert!(patched.contains("144 120 90 60 50 48 30"));

    backup.restore().unwrap();
    assert_eq!(snapshot(&env.dts_dir()), before);
    assert!(!env.kernel_source.join(dts::DTS_BACKUP).exists());
}

#[test]
fn test_dts_restored_when_pass_fails() {
    let env = TestEnv::new();
    env.create_kernel_tree();
    let before = snapshot(&env.dts_dir());

    let failing_pass = || -> anyhow::Result<()> {
        let _backup = dts::patch_for_miui(&env.kernel_source)?;
        anyhow::bail!("make failed")
    };
    assert!(failing_pass().is_err());

    assert_eq!(snapshot(&env.dts_dir()), before);
}

#[test]
fn test_dts_missing_directory_is_skipped() {
    let env = TestEnv::new();
    assert!(dts::patch_for_miui(&env.kernel_source).unwrap().is_none());
}

#[test]
fn test_stale_backup_recovered_before_patching() {
    let env = TestEnv::new();
    env.create_kernel_tree();
    let before = snapshot(&env.dts_dir());

    // Simulate a run killed after patching
    let backup = dts::patch_for_miui(&env.kernel_source).unwrap().unwrap();
    std::mem::forget(backup);
    assert_ne!(snapshot(&env.dts_dir()), before);

    let backup = dts::DtsBackup::create(&env.kernel_source).unwrap().unwrap();
    assert_eq!(snapshot(&env.dts_dir()), before);
    backup.restore().unwrap();
    assert_eq!(snapshot(&env.dts_dir()), before);
}

// =============================================================================
// Kconfig
// =============================================================================

#[test]
fn test_kconfig_apply_invokes_tool_per_group() {
    let env = TestEnv::new();
    env.create_kernel_tree();
    let config_file = env.kernel_source.join("out/.config");
    fs::create_dir_all(config_file.parent().unwrap()).unwrap();
    fs::write(&config_file, "").unwrap();

    let (config, _) = parse(&["alioth", "--ksu", "rksu", "--additional", "susfs"]);
    kconfig::apply(&env.kernel_source, &config_file, &kconfig::plan(SystemPass::Aosp, &config))
        .unwrap();

    let calls = env.config_calls();
    assert_eq!(calls.len(), 3);
    for call in &calls {
        assert!(call.starts_with(&format!("--file {}", config_file.display())));
    }
    assert!(calls[0].contains("-d KSU_MANUAL_HOOK"));
    assert!(calls[2].contains("-e KSU -e KSU_SUSFS"));
}

#[test]
fn test_kconfig_tool_failure_is_fatal() {
    let env = TestEnv::new();
    env.create_kernel_tree();
    create_script(&env.kernel_source.join("scripts/config"), "#!/bin/sh\necho broken >&2\nexit 1\n");
    let config_file = env.kernel_source.join(".config");
    fs::write(&config_file, "").unwrap();

    let (config, _) = parse(&["alioth"]);
    let err = kconfig::apply(&env.kernel_source, &config_file, &kconfig::plan(SystemPass::Miui, &config))
        .unwrap_err();
    assert!(err.to_string().contains("broken"));
}

// =============================================================================
// KernelSU
// =============================================================================

#[test]
fn test_noksu_setup_does_not_fetch() {
    let env = TestEnv::new();
    let (config, _) = parse(&["alioth", "--ksu", "noksu"]);
    let fetcher = RecordingFetcher::new();
    let mut setup = KsuSetup::new();

    let label = setup.run(&env.kernel_source, &config, &fetcher).unwrap();
    assert_eq!(label, "NoKernelSU");
    assert!(fetcher.calls().is_empty());
    assert_eq!(setup.state(), &KsuState::Disabled);
}

#[test]
fn test_setup_fetch_failure_marks_failed() {
    let env = TestEnv::new();
    let (config, _) = parse(&["alioth", "--ksu", "sukisu"]);
    let fetcher = RecordingFetcher::new();
    let mut setup = KsuSetup::new();

    assert!(setup.run(&env.kernel_source, &config, &fetcher).is_err());
    assert_eq!(fetcher.calls().len(), 1);
    assert!(matches!(setup.state(), KsuState::Failed { .. }));
}

// =============================================================================
// Packaging
// =============================================================================

#[test]
fn test_archive_name_shape() {
    let name = ArchiveName {
        system: SystemPass::Aosp,
        device: "munch".to_string(),
        ksu_label: "NoKernelSU".to_string(),
        timestamp: package::timestamp_now(),
        revision: "1a2b3c4".to_string(),
    };
    let re = Regex::new(
        r"^Kernel_(AOSP|MIUI)_munch_NoKernelSU_\d{8}-\d{6}_anykernel3_1a2b3c4\.zip$",
    )
    .unwrap();
    assert!(re.is_match(&name.file_name()), "{}", name.file_name());
}

#[test]
fn test_missing_image_aborts_packaging() {
    let env = TestEnv::new();
    let out_dir = env.kernel_source.join("out_alioth_unknown");
    fs::create_dir_all(&out_dir).unwrap();
    let fetcher = RecordingFetcher::new();

    let request = PackageRequest {
        out_dir: &out_dir,
        work_dir: &env.work_dir,
        name: ArchiveName {
            system: SystemPass::Miui,
            device: "alioth".to_string(),
            ksu_label: "SukiSU-Ultra".to_string(),
            timestamp: "20261018-120000".to_string(),
            revision: "unknown".to_string(),
        },
        kpm_patch: true,
        template_url: "https://invalid.example/AnyKernel3",
        template_branch: "master",
    };
    let err = package::package(&request, &fetcher).unwrap_err();

    assert!(err.to_string().contains("Kernel image not found"));
    assert!(fetcher.calls().is_empty());
    assert_eq!(fs::read_dir(&env.work_dir).unwrap().count(), 0);
}
