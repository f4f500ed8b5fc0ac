//! Per-variant kernel configuration.
//!
//! The generated `.config` is edited through the kernel's own
//! `scripts/config` helper. What gets enabled or disabled is data: each
//! group below is an ordered list of directives, and [`plan`] picks the
//! groups for a pass. Groups are applied in the order returned; later
//! groups only touch their own options, so SuSFS disabling never undoes
//! what the manual-hook or KPM groups set.

use anyhow::{bail, Result};
use std::path::Path;

use crate::options::{BuildConfig, KsuVariant, SystemPass};
use crate::process::Cmd;

/// One `scripts/config` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Enable(&'static str),
    Disable(&'static str),
    SetStr(&'static str, &'static str),
}

impl Directive {
    pub fn name(&self) -> &'static str {
        match *self {
            Self::Enable(n) | Self::Disable(n) | Self::SetStr(n, _) => n,
        }
    }

    /// Arguments for `scripts/config`.
    pub fn args(&self) -> Vec<&'static str> {
        match *self {
            Self::Enable(n) => vec!["-e", n],
            Self::Disable(n) => vec!["-d", n],
            Self::SetStr(n, v) => vec!["--set-str", n, v],
        }
    }
}

/// A named, ordered set of directives applied in one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigGroup {
    pub name: &'static str,
    pub directives: Vec<Directive>,
}

const MIUI_STRINGS: [(&str, &str); 1] = [("STATIC_USERMODEHELPER_PATH", "/system/bin/micd")];

const MIUI_ENABLE: [&str; 19] = [
    "PERF_CRITICAL_RT_TASK",
    "SF_BINDER",
    "OVERLAY_FS",
    "MIGT",
    "MIGT_ENERGY_MODEL",
    "MIHW",
    "PACKAGE_RUNTIME_INFO",
    "BINDER_OPT",
    "KPERFEVENTS",
    "MILLET",
    "PERF_HUMANTASK",
    "XIAOMI_MIUI",
    "TASK_DELAY_ACCT",
    "MIUI_ZRAM_MEMORY_TRACKING",
    "MI_FRAGMENTION",
    "PERF_HELPER",
    "BOOTUP_RECLAIM",
    "MI_RECLAIM",
    "RTMM",
];

const MIUI_DISABLE: [&str; 4] = ["DEBUG_FS", "LTO_CLANG", "LOCALVERSION_AUTO", "MI_MEMORY_SYSFS"];

pub const MANUAL_HOOK: &str = "KSU_MANUAL_HOOK";

pub const KPM_OPTIONS: [&str; 3] = ["KPM", "KALLSYMS", "KALLSYMS_ALL"];

pub const KSU: &str = "KSU";

pub const SUSFS_OPTIONS: [&str; 16] = [
    "KSU_SUSFS",
    "KSU_SUSFS_HAS_MAGIC_MOUNT",
    "KSU_SUSFS_SUS_PATH",
    "KSU_SUSFS_SUS_MOUNT",
    "KSU_SUSFS_AUTO_ADD_SUS_KSU_DEFAULT_MOUNT",
    "KSU_SUSFS_AUTO_ADD_SUS_BIND_MOUNT",
    "KSU_SUSFS_SUS_KSTAT",
    "KSU_SUSFS_SUS_OVERLAYFS",
    "KSU_SUSFS_TRY_UMOUNT",
    "KSU_SUSFS_AUTO_ADD_TRY_UMOUNT_FOR_BIND_MOUNT",
    "KSU_SUSFS_SPOOF_UNAME",
    "KSU_SUSFS_ENABLE_LOG",
    "KSU_SUSFS_HIDE_KSU_SUSFS_SYMBOLS",
    "KSU_SUSFS_SPOOF_CMDLINE_OR_BOOTCONFIG",
    "KSU_SUSFS_OPEN_REDIRECT",
    "KSU_SUSFS_SUS_SU",
];

/// Conflicts with the manual hook; always off.
pub const SUSFS_CONFLICT: &str = "KSU_SUSFS_ADD_SUS_MAP";

fn miui_group() -> ConfigGroup {
    let mut directives: Vec<Directive> = MIUI_STRINGS
        .iter()
        .map(|&(n, v)| Directive::SetStr(n, v))
        .collect();
    directives.extend(MIUI_ENABLE.iter().copied().map(Directive::Enable));
    directives.extend(MIUI_DISABLE.iter().copied().map(Directive::Disable));
    ConfigGroup {
        name: "MIUI",
        directives,
    }
}

fn manual_hook_group(ksu: KsuVariant) -> ConfigGroup {
    let directive = if ksu == KsuVariant::SukisuUltra {
        Directive::Enable(MANUAL_HOOK)
    } else {
        Directive::Disable(MANUAL_HOOK)
    };
    ConfigGroup {
        name: "manual hook",
        directives: vec![directive],
    }
}

fn kpm_group(enabled: bool) -> ConfigGroup {
    let directives = KPM_OPTIONS
        .iter()
        .map(|&n| if enabled { Directive::Enable(n) } else { Directive::Disable(n) })
        .collect();
    ConfigGroup {
        name: "KPM",
        directives,
    }
}

fn susfs_group(enabled: bool) -> ConfigGroup {
    let mut directives = Vec::with_capacity(SUSFS_OPTIONS.len() + 2);
    if enabled {
        directives.push(Directive::Enable(KSU));
        directives.extend(SUSFS_OPTIONS.iter().copied().map(Directive::Enable));
    } else {
        directives.push(Directive::Disable(KSU));
        directives.extend(SUSFS_OPTIONS.iter().copied().map(Directive::Disable));
    }
    directives.push(Directive::Disable(SUSFS_CONFLICT));
    ConfigGroup {
        name: "SuSFS",
        directives,
    }
}

/// Groups to apply for one pass, in application order.
pub fn plan(pass: SystemPass, config: &BuildConfig) -> Vec<ConfigGroup> {
    let features = config.features();
    let mut groups = Vec::new();
    if pass == SystemPass::Miui {
        groups.push(miui_group());
    }
    groups.push(manual_hook_group(config.ksu));
    groups.push(kpm_group(features.kpm));
    groups.push(susfs_group(features.susfs));
    groups
}

/// Apply `groups` to `config_file` with the tree's `scripts/config`.
pub fn apply(kernel_source: &Path, config_file: &Path, groups: &[ConfigGroup]) -> Result<()> {
    let tool = kernel_source.join("scripts/config");
    if !tool.exists() {
        bail!("Kernel config tool not found at {}", tool.display());
    }
    if !config_file.exists() {
        bail!(
            "Generated config not found at {}\nDid the defconfig step run?",
            config_file.display()
        );
    }

    for group in groups {
        println!("  Applying {} options ({})...", group.name, group.directives.len());
        Cmd::new(&tool)
            .arg("--file")
            .arg_path(config_file)
            .args(group.directives.iter().flat_map(|d| d.args()))
            .dir(kernel_source)
            .error_msg(format!("Applying {} config options failed", group.name))
            .run()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Addon, TargetSystem};
    use std::collections::HashMap;

    fn config(ksu: KsuVariant, addon: Addon) -> BuildConfig {
        BuildConfig {
            device: "alioth".to_string(),
            ksu,
            addon,
            system: TargetSystem::Miui,
            ccache: true,
            skip_clean: false,
            extra_make_args: Vec::new(),
        }
    }

    /// Final state per option after applying groups in order.
    fn resolve(groups: &[ConfigGroup]) -> HashMap<&'static str, Directive> {
        let mut state = HashMap::new();
        for d in groups.iter().flat_map(|g| g.directives.iter()) {
            state.insert(d.name(), *d);
        }
        state
    }

    #[test]
    fn test_miui_group_only_on_miui_pass() {
        let cfg = config(KsuVariant::None, Addon::None);
        let miui = plan(SystemPass::Miui, &cfg);
        let aosp = plan(SystemPass::Aosp, &cfg);
        assert_eq!(miui[0].name, "MIUI");
        assert_eq!(miui.len(), 4);
        assert_eq!(aosp.len(), 3);
        assert!(aosp.iter().all(|g| g.name != "MIUI"));
    }

    #[test]
    fn test_miui_group_shape() {
        let group = miui_group();
        let sets = group
            .directives
            .iter()
            .filter(|d| matches!(d, Directive::SetStr(..)))
            .count();
        let disables = group
            .directives
            .iter()
            .filter(|d| matches!(d, Directive::Disable(_)))
            .count();
        assert_eq!(sets, 1);
        assert_eq!(disables, 4);
        assert_eq!(
            Directive::SetStr("STATIC_USERMODEHELPER_PATH", "/system/bin/micd").args(),
            vec!["--set-str", "STATIC_USERMODEHELPER_PATH", "/system/bin/micd"]
        );
    }

    #[test]
    fn test_ultra_susfs_kpm_plan() {
        let state = resolve(&plan(
            SystemPass::Miui,
            &config(KsuVariant::SukisuUltra, Addon::SusfsKpm),
        ));
        assert_eq!(state[MANUAL_HOOK], Directive::Enable(MANUAL_HOOK));
        assert_eq!(state[KSU], Directive::Enable(KSU));
        for name in KPM_OPTIONS.iter().chain(SUSFS_OPTIONS.iter()) {
            assert_eq!(state[name], Directive::Enable(*name), "{}", name);
        }
        assert_eq!(state[SUSFS_CONFLICT], Directive::Disable(SUSFS_CONFLICT));
    }

    #[test]
    fn test_noksu_disables_everything() {
        let state = resolve(&plan(SystemPass::Aosp, &config(KsuVariant::None, Addon::None)));
        assert_eq!(state[MANUAL_HOOK], Directive::Disable(MANUAL_HOOK));
        for name in KPM_OPTIONS
            .iter()
            .chain(SUSFS_OPTIONS.iter())
            .chain([KSU, SUSFS_CONFLICT].iter())
        {
            assert_eq!(state[name], Directive::Disable(*name), "{}", name);
        }
    }

    #[test]
    fn test_groups_do_not_overlap() {
        let groups = plan(SystemPass::Miui, &config(KsuVariant::Rksu, Addon::Kpm));
        let mut seen = std::collections::HashSet::new();
        for d in groups.iter().flat_map(|g| g.directives.iter()) {
            assert!(seen.insert(d.name()), "{} set by two groups", d.name());
        }
    }

    #[test]
    fn test_apply_requires_config_tool() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply(dir.path(), &dir.path().join(".config"), &[]).unwrap_err();
        assert!(err.to_string().contains("scripts/config"));
    }
}
