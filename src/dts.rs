//! MIUI device-tree patching.
//!
//! MIUI builds need a handful of panel tweaks in the vendor device-tree
//! sources. The tree is backed up before patching and put back when the
//! pass ends; [`DtsBackup`] restores on drop so an aborted pass never
//! leaves patched sources behind.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::copy_dir_all;

/// Device-tree sources, relative to the kernel tree.
pub const DTS_ROOT: &str = "arch/arm64/boot/dts/vendor/qcom";
/// Backup location, relative to the kernel tree.
pub const DTS_BACKUP: &str = ".dts.bak";
/// Copy in progress; renamed to [`DTS_BACKUP`] once complete.
pub const DTS_BACKUP_STAGING: &str = ".dts.bak.tmp";

/// Replace `search` with `replace` in every file matching `files`.
///
/// `files` is a file name in the device-tree directory, or a prefix
/// ending in `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Substitution {
    pub files: &'static str,
    pub search: &'static str,
    pub replace: &'static str,
}

const fn sub(files: &'static str, search: &'static str, replace: &'static str) -> Substitution {
    Substitution {
        files,
        search,
        replace,
    }
}

pub const MIUI_SUBSTITUTIONS: &[Substitution] = &[
    // Panel dimensions (mm)
    sub("dsi-panel-j1s*", "<154>", "<1537>"),
    sub("dsi-panel-j2*", "<154>", "<1537>"),
    sub("dsi-panel-j3s-37-02-0a-dsc-video.dtsi", "<155>", "<1544>"),
    sub("dsi-panel-j11-38-08-0a-fhd-cmd.dtsi", "<155>", "<1545>"),
    sub("dsi-panel-k11a-38-08-0a-dsc-cmd.dtsi", "<155>", "<1546>"),
    sub("dsi-panel-l11r-38-08-0a-dsc-cmd.dtsi", "<155>", "<1546>"),
    sub("dsi-panel-j3s-37-02-0a-dsc-video.dtsi", "<70>", "<695>"),
    sub("dsi-panel-j11-38-08-0a-fhd-cmd.dtsi", "<70>", "<695>"),
    sub("dsi-panel-k11a-38-08-0a-dsc-cmd.dtsi", "<70>", "<695>"),
    sub("dsi-panel-l11r-38-08-0a-dsc-cmd.dtsi", "<70>", "<695>"),
    sub("dsi-panel-j1s*", "<71>", "<710>"),
    sub("dsi-panel-j2*", "<71>", "<710>"),
    // Smart FPS back on, qsync minimum off
    sub("dsi-panel*", "//mi,mdss-dsi-pan-enable-smart-fps", "mi,mdss-dsi-pan-enable-smart-fps"),
    sub("dsi-panel*", "//mi,mdss-dsi-smart-fps-max_framerate", "mi,mdss-dsi-smart-fps-max_framerate"),
    sub("dsi-panel*", "//qcom,mdss-dsi-pan-enable-smart-fps", "qcom,mdss-dsi-pan-enable-smart-fps"),
    sub("dsi-panel*", "qcom,mdss-dsi-qsync-min-refresh-rate", "//qcom,mdss-dsi-qsync-min-refresh-rate"),
    // Refresh rates MIUI exposes
    sub("dsi-panel-g7a-37-02-0a-dsc-video.dtsi", "120 90 60", "120 90 60 50 30"),
    sub("dsi-panel-g7a-37-02-0b-dsc-video.dtsi", "120 90 60", "120 90 60 50 30"),
    sub("dsi-panel-g7a-36-02-0c-dsc-video.dtsi", "120 90 60", "120 90 60 50 30"),
    sub("dsi-panel-j3s-37-02-0a-dsc-video.dtsi", "144 120 90 60", "144 120 90 60 50 48 30"),
    // Brightness commands
    sub("dsi-panel-j1u-42-02-0b-dsc-cmd.dtsi", "//39 01 00 00 01 00 03 51 0F FF", "39 01 00 00 01 00 03 51 0F FF"),
    sub("dsi-panel-j2-42-02-0b-dsc-cmd.dtsi", "//39 01 00 00 00 00 05 51 0F 8F 00 00", "39 01 00 00 00 00 05 51 0F 8F 00 00"),
    sub("dsi-panel-j2-mp-42-02-0b-dsc-cmd.dtsi", "//39 01 00 00 00 00 05 51 0F 8F 00 00", "39 01 00 00 00 00 05 51 0F 8F 00 00"),
    sub("dsi-panel-j2-p2-1-42-02-0b-dsc-cmd.dtsi", "//39 01 00 00 00 00 05 51 0F 8F 00 00", "39 01 00 00 00 00 05 51 0F 8F 00 00"),
    sub("dsi-panel-j2s-mp-42-02-0a-dsc-cmd.dtsi", "//39 01 00 00 00 00 03 51 0D FF", "39 01 00 00 00 00 03 51 0D FF"),
];

pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Replace every `search` with `replace`, leaving text that already reads
/// as `replace` alone, so applying twice equals applying once.
pub fn substitute(content: &str, search: &str, replace: &str) -> String {
    if search.is_empty() {
        return content.to_string();
    }
    if replace.contains(search) {
        content
            .split(replace)
            .map(|piece| piece.replace(search, replace))
            .collect::<Vec<_>>()
            .join(replace)
    } else {
        content.replace(search, replace)
    }
}

/// Apply `subs` to the files in `dir`. Returns how many files changed.
pub fn apply_substitutions(dir: &Path, subs: &[Substitution]) -> Result<usize> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut changed = std::collections::BTreeSet::new();
    for s in subs {
        let targets: Vec<&String> = names.iter().filter(|n| matches_pattern(n, s.files)).collect();
        if targets.is_empty() {
            eprintln!("  [WARN] No device-tree file matches {}", s.files);
            continue;
        }
        for name in targets {
            let path = dir.join(name);
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let patched = substitute(&content, s.search, s.replace);
            if patched != content {
                fs::write(&path, patched)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                changed.insert(name.clone());
            }
        }
    }
    Ok(changed.len())
}

/// Pristine copy of the device-tree sources, restored on `restore` or drop.
#[derive(Debug)]
pub struct DtsBackup {
    source: PathBuf,
    backup: PathBuf,
    restored: bool,
}

impl DtsBackup {
    /// Back up the device-tree sources of `kernel_source`.
    ///
    /// Returns `None` when the tree has no device-tree directory. A backup
    /// left behind by an interrupted run is restored first.
    pub fn create(kernel_source: &Path) -> Result<Option<Self>> {
        let source = kernel_source.join(DTS_ROOT);
        let backup = kernel_source.join(DTS_BACKUP);
        let staging = kernel_source.join(DTS_BACKUP_STAGING);

        // An interrupted copy never became a backup; the sources are untouched.
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to remove {}", staging.display()))?;
        }

        if backup.exists() {
            eprintln!(
                "  [WARN] Found stale device-tree backup at {}, restoring it first",
                backup.display()
            );
            recover_stale(&source, &backup)?;
        }

        if !source.is_dir() {
            println!("  [SKIP] No device-tree sources at {}", source.display());
            return Ok(None);
        }

        if let Err(e) = copy_dir_all(&source, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.context(format!("Failed to back up {}", source.display())));
        }
        fs::rename(&staging, &backup)
            .with_context(|| format!("Failed to move backup into {}", backup.display()))?;
        Ok(Some(Self {
            source,
            backup,
            restored: false,
        }))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Put the original sources back.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        restore_dir(&self.source, &self.backup)
    }
}

impl Drop for DtsBackup {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(e) = restore_dir(&self.source, &self.backup) {
            eprintln!("  [WARN] Failed to restore device-tree sources: {:#}", e);
        }
    }
}

fn restore_dir(source: &Path, backup: &Path) -> Result<()> {
    if !backup.exists() {
        return Ok(());
    }
    if source.exists() {
        fs::remove_dir_all(source)
            .with_context(|| format!("Failed to remove patched {}", source.display()))?;
    }
    fs::rename(backup, source).with_context(|| {
        format!("Failed to restore {} from {}", source.display(), backup.display())
    })?;
    println!("  Restored device-tree sources");
    Ok(())
}

/// Copy a leftover backup over the sources without deleting anything the
/// backup lacks, then drop it.
fn recover_stale(source: &Path, backup: &Path) -> Result<()> {
    if !source.exists() {
        return restore_dir(source, backup);
    }
    copy_dir_all(backup, source)
        .with_context(|| format!("Failed to recover {} from {}", source.display(), backup.display()))?;
    fs::remove_dir_all(backup)
        .with_context(|| format!("Failed to remove {}", backup.display()))?;
    println!("  Recovered device-tree sources from stale backup");
    Ok(())
}

/// Back up and patch the device-tree sources for a MIUI pass.
pub fn patch_for_miui(kernel_source: &Path) -> Result<Option<DtsBackup>> {
    println!("Patching device trees for MIUI...");
    let Some(backup) = DtsBackup::create(kernel_source)? else {
        return Ok(None);
    };
    let changed = apply_substitutions(backup.source(), MIUI_SUBSTITUTIONS)?;
    println!("  Patched {} device-tree files", changed);
    Ok(Some(backup))
}
