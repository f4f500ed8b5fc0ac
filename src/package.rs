//! AnyKernel3 packaging.
//!
//! Takes the compiled image and device-tree blobs out of the build
//! directory, optionally runs the KPM patcher over the image, drops both
//! into a local AnyKernel3 checkout and zips it.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::{empty_dir, write_file_mode};
use crate::download::Fetch;
use crate::options::SystemPass;
use crate::process::Cmd;

/// Paths relative to the build output directory.
pub const IMAGE_PATH: &str = "arch/arm64/boot/Image";
pub const DTS_OUTPUT: &str = "arch/arm64/boot/dts";
pub const DTB_PATH: &str = "arch/arm64/boot/dtb";

pub const KPM_PATCHER_URL: &str =
    "https://github.com/SukiSU-Ultra/SukiSU_KernelPatch_patch/releases/download/0.12.0/patch_linux";
const KPM_PATCHER: &str = "patch_linux";
const KPM_OUTPUT: &str = "oImage";

/// AnyKernel3 checkout, relative to the working directory.
pub const TEMPLATE_DIR: &str = "anykernel";
/// Payload directory inside the template.
pub const PAYLOAD_DIR: &str = "kernels";

/// What happened to the KPM patch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KpmOutcome {
    NotRequested,
    Applied,
    /// The patch failed; the unpatched image was packaged.
    SkippedDegraded(String),
}

/// Fields of the archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub system: SystemPass,
    pub device: String,
    pub ksu_label: String,
    pub timestamp: String,
    pub revision: String,
}

impl ArchiveName {
    /// `Kernel_<SYSTEM>_<device>_<ksu>_<timestamp>_anykernel3_<revision>.zip`
    pub fn file_name(&self) -> String {
        format!(
            "Kernel_{}_{}_{}_{}_anykernel3_{}.zip",
            self.system.label(),
            self.device,
            self.ksu_label,
            self.timestamp,
            self.revision
        )
    }
}

/// Local time as used in archive names.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// The compiled image, or an error if the build did not produce one.
pub fn require_image(out_dir: &Path) -> Result<PathBuf> {
    let image = out_dir.join(IMAGE_PATH);
    if !image.is_file() {
        bail!("Kernel image not found.\nExpected: {}", image.display());
    }
    Ok(image)
}

/// Run the KPM patcher over `image`. Never fails: problems degrade to
/// packaging the unpatched image.
pub fn apply_kpm_patch(image: &Path, fetcher: &dyn Fetch) -> KpmOutcome {
    println!("  Applying KPM patch...");
    match try_kpm_patch(image, fetcher) {
        Ok(()) => {
            println!("  KPM patch applied");
            KpmOutcome::Applied
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            eprintln!("  [KPM] Patch failed, packaging unpatched image: {}", reason);
            KpmOutcome::SkippedDegraded(reason)
        }
    }
}

fn try_kpm_patch(image: &Path, fetcher: &dyn Fetch) -> Result<()> {
    let dir = image
        .parent()
        .context("Kernel image has no parent directory")?;
    let patcher = dir.join(KPM_PATCHER);
    let patched = dir.join(KPM_OUTPUT);

    let binary = fetcher
        .fetch(KPM_PATCHER_URL)
        .with_context(|| format!("Failed to download {}", KPM_PATCHER_URL))?;
    write_file_mode(&patcher, binary, 0o755)?;

    let _ = fs::remove_file(&patched);
    let result = Cmd::new(&patcher)
        .dir(dir)
        .error_msg("KPM patcher failed")
        .run();
    let _ = fs::remove_file(&patcher);
    result?;

    if !patched.is_file() {
        bail!("KPM patcher did not produce {}", patched.display());
    }
    fs::rename(&patched, image)
        .with_context(|| format!("Failed to replace {} with patched image", image.display()))?;
    Ok(())
}

/// Concatenated device-tree blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtbBlob {
    pub path: PathBuf,
    pub count: usize,
}

/// Concatenate every `*.dtb` under the build output, in path order.
///
/// An empty blob is written when there are none.
pub fn concat_dtbs(out_dir: &Path) -> Result<DtbBlob> {
    let dts_dir = out_dir.join(DTS_OUTPUT);
    let blob_path = out_dir.join(DTB_PATH);

    let mut dtbs = Vec::new();
    if dts_dir.is_dir() {
        for entry in WalkDir::new(&dts_dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", dts_dir.display()))?;
            if entry.file_type().is_file()
                && entry.path().extension().map(|e| e == "dtb").unwrap_or(false)
            {
                dtbs.push(entry.into_path());
            }
        }
    }

    if let Some(parent) = blob_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut blob = fs::File::create(&blob_path)
        .with_context(|| format!("Failed to create {}", blob_path.display()))?;
    for dtb in &dtbs {
        let bytes = fs::read(dtb).with_context(|| format!("Failed to read {}", dtb.display()))?;
        blob.write_all(&bytes)?;
    }

    if dtbs.is_empty() {
        eprintln!("  [WARN] No .dtb files found, packaging an empty dtb");
    } else {
        println!("  Concatenated {} device-tree blobs", dtbs.len());
    }

    Ok(DtbBlob {
        path: blob_path,
        count: dtbs.len(),
    })
}

/// Clone the packaging template once; reuse it afterwards.
pub fn ensure_template(work_dir: &Path, url: &str, branch: &str) -> Result<PathBuf> {
    let template = work_dir.join(TEMPLATE_DIR);
    if template.is_dir() {
        println!("  Using existing {}", template.display());
        return Ok(template);
    }

    println!("  Cloning {} ({})...", url, branch);
    Cmd::new("git")
        .args(["clone", "--depth=1", "--single-branch", "-b", branch, url])
        .arg_path(&template)
        .dir(work_dir)
        .error_msg(format!("Failed to clone packaging template {}", url))
        .run_interactive()?;
    Ok(template)
}

/// Replace the template's payload with `image` and `dtb`.
pub fn stage_payload(template: &Path, image: &Path, dtb: &Path) -> Result<()> {
    let payload = template.join(PAYLOAD_DIR);
    empty_dir(&payload)?;
    fs::copy(image, payload.join("Image"))
        .with_context(|| format!("Failed to copy {}", image.display()))?;
    fs::copy(dtb, payload.join("dtb"))
        .with_context(|| format!("Failed to copy {}", dtb.display()))?;
    Ok(())
}

/// Zip the template into `archive`.
pub fn create_archive(template: &Path, archive: &Path) -> Result<()> {
    if archive.exists() {
        fs::remove_file(archive)
            .with_context(|| format!("Failed to remove old {}", archive.display()))?;
    }
    Cmd::new("zip")
        .arg("-r9")
        .arg_path(archive)
        .args([".", "-x", ".git/*", ".gitignore", "*.zip"])
        .dir(template)
        .error_msg("Failed to create archive")
        .run()?;

    if !archive.is_file() {
        bail!("zip reported success but {} is missing", archive.display());
    }
    Ok(())
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Inputs for one packaging run.
pub struct PackageRequest<'a> {
    pub out_dir: &'a Path,
    /// Where the template lives and the archive is written.
    pub work_dir: &'a Path,
    pub name: ArchiveName,
    pub kpm_patch: bool,
    pub template_url: &'a str,
    pub template_branch: &'a str,
}

/// Result of a packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReport {
    pub archive: PathBuf,
    pub kpm: KpmOutcome,
    pub dtb_count: usize,
    pub sha256: String,
}

pub fn package(req: &PackageRequest, fetcher: &dyn Fetch) -> Result<PackageReport> {
    println!("Packaging...");
    let image = require_image(req.out_dir)?;

    let kpm = if req.kpm_patch {
        apply_kpm_patch(&image, fetcher)
    } else {
        KpmOutcome::NotRequested
    };

    let dtb = concat_dtbs(req.out_dir)?;
    let template = ensure_template(req.work_dir, req.template_url, req.template_branch)?;
    stage_payload(&template, &image, &dtb.path)?;

    let archive = req.work_dir.join(req.name.file_name());
    create_archive(&template, &archive)?;
    let sha256 = sha256_file(&archive)?;
    println!("  Created {}", archive.display());

    Ok(PackageReport {
        archive,
        kpm,
        dtb_count: dtb.count,
        sha256,
    })
}
