//! KernelSU integration.
//!
//! Each variant is installed by its upstream `setup.sh`, fetched and run
//! inside the kernel tree with a ref that depends on whether SuSFS is
//! wanted. The variant table below is the only place that knows URLs and
//! refs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::download::Fetch;
use crate::options::{BuildConfig, KsuVariant};
use crate::process::Cmd;

/// Upstream source for one KernelSU variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KsuSource {
    pub setup_url: &'static str,
    /// Ref passed to setup.sh when SuSFS is enabled; `None` if unsupported.
    pub susfs_ref: Option<&'static str>,
    pub plain_ref: &'static str,
    pub label: &'static str,
}

impl KsuSource {
    pub fn ref_for(&self, susfs: bool) -> Option<&'static str> {
        if susfs {
            self.susfs_ref
        } else {
            Some(self.plain_ref)
        }
    }
}

const OFFICIAL: KsuSource = KsuSource {
    setup_url: "https://raw.githubusercontent.com/tiann/KernelSU/main/kernel/setup.sh",
    susfs_ref: None,
    plain_ref: "v0.9.5",
    label: "KernelSU",
};

const RKSU: KsuSource = KsuSource {
    setup_url: "https://raw.githubusercontent.com/rsuntk/KernelSU/main/kernel/setup.sh",
    susfs_ref: Some("susfs-rksu-master"),
    plain_ref: "main",
    label: "RKSU",
};

const SUKISU: KsuSource = KsuSource {
    setup_url: "https://raw.githubusercontent.com/ShirkNeko/KernelSU/main/kernel/setup.sh",
    susfs_ref: Some("susfs-dev"),
    plain_ref: "dev",
    label: "SukiSU",
};

const SUKISU_ULTRA: KsuSource = KsuSource {
    setup_url: "https://raw.githubusercontent.com/SukiSU-Ultra/SukiSU-Ultra/main/kernel/setup.sh",
    susfs_ref: Some("susfs-main"),
    plain_ref: "nongki",
    label: "SukiSU-Ultra",
};

/// Raw-file base for the SukiSU-Ultra version sync.
const ULTRA_RAW_BASE: &str = "https://raw.githubusercontent.com/SukiSU-Ultra/SukiSU-Ultra";
pub const VERSION_KEY: &str = "KSU_VERSION_API";
/// Local copy rewritten by the version sync, relative to the kernel tree.
pub const LOCAL_VERSION_FILE: &str = "KernelSU/kernel/Makefile";

const NO_KSU_LABEL: &str = "NoKernelSU";

pub fn source(variant: KsuVariant) -> Option<&'static KsuSource> {
    match variant {
        KsuVariant::None => None,
        KsuVariant::Ksu => Some(&OFFICIAL),
        KsuVariant::Rksu => Some(&RKSU),
        KsuVariant::Sukisu => Some(&SUKISU),
        KsuVariant::SukisuUltra => Some(&SUKISU_ULTRA),
    }
}

/// Label embedded in archive names (`SukiSU-Ultra_SuSFS`, `NoKernelSU`, ...).
pub fn display_label(variant: KsuVariant, susfs: bool) -> String {
    match source(variant) {
        None => NO_KSU_LABEL.to_string(),
        Some(src) if susfs => format!("{}_SuSFS", src.label),
        Some(src) => src.label.to_string(),
    }
}

/// Install progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KsuState {
    Disabled,
    Installing,
    Installed { label: String },
    Failed { reason: String },
}

/// Drives one KernelSU installation.
#[derive(Debug)]
pub struct KsuSetup {
    state: KsuState,
}

impl Default for KsuSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl KsuSetup {
    pub fn new() -> Self {
        Self {
            state: KsuState::Disabled,
        }
    }

    pub fn state(&self) -> &KsuState {
        &self.state
    }

    /// Install the configured variant into `kernel_source`.
    ///
    /// Returns the display label for packaging. Without KernelSU nothing is
    /// fetched and the state stays `Disabled`.
    pub fn run(
        &mut self,
        kernel_source: &Path,
        config: &BuildConfig,
        fetcher: &dyn Fetch,
    ) -> Result<String> {
        let features = config.features();
        let label = display_label(config.ksu, features.susfs);

        let Some(src) = source(config.ksu) else {
            println!("  [SKIP] KernelSU disabled");
            return Ok(label);
        };

        // Checked again here so no caller can reach the network with it.
        let Some(git_ref) = src.ref_for(features.susfs) else {
            let reason = format!("{} does not support SuSFS", config.ksu.cli_name());
            self.state = KsuState::Failed {
                reason: reason.clone(),
            };
            bail!(reason);
        };

        self.state = KsuState::Installing;
        println!("  Installing {} ({})...", label, git_ref);

        match install(kernel_source, config.ksu, src, git_ref, fetcher) {
            Ok(()) => {
                println!("  Installed {}", label);
                self.state = KsuState::Installed {
                    label: label.clone(),
                };
                Ok(label)
            }
            Err(e) => {
                self.state = KsuState::Failed {
                    reason: format!("{:#}", e),
                };
                Err(e.context(format!("KernelSU setup ({}) failed", label)))
            }
        }
    }
}

fn install(
    kernel_source: &Path,
    variant: KsuVariant,
    src: &KsuSource,
    git_ref: &str,
    fetcher: &dyn Fetch,
) -> Result<()> {
    let script = fetcher
        .fetch(src.setup_url)
        .with_context(|| format!("Failed to fetch bootstrap script {}", src.setup_url))?;

    let script_path = kernel_source.join(".ksu-setup.sh");
    fs::write(&script_path, script)
        .with_context(|| format!("Failed to write {}", script_path.display()))?;

    let result = Cmd::new("bash")
        .arg_path(&script_path)
        .arg(git_ref)
        .dir(kernel_source)
        .error_msg("KernelSU setup script failed")
        .run_interactive();
    let _ = fs::remove_file(&script_path);
    result?;

    if variant == KsuVariant::SukisuUltra {
        sync_ultra_version(kernel_source, git_ref, fetcher)?;
    }
    Ok(())
}

/// Value of the first `key := value` line, trimmed.
pub fn extract_version(text: &str, key: &str) -> Option<String> {
    text.lines()
        .filter_map(|l| l.split_once(":="))
        .find(|(lhs, _)| lhs.trim() == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Replace the value of every `key := ...` line.
pub fn rewrite_version(content: &str, key: &str, value: &str) -> String {
    let mut out = content
        .lines()
        .map(|line| match line.split_once(":=") {
            Some((lhs, _)) if lhs.trim() == key => format!("{}:= {}", lhs, value),
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn sync_ultra_version(kernel_source: &Path, git_ref: &str, fetcher: &dyn Fetch) -> Result<()> {
    let url = format!("{}/{}/kernel/Makefile", ULTRA_RAW_BASE, git_ref);
    let upstream = fetcher
        .fetch_text(&url)
        .with_context(|| format!("Failed to fetch version file {}", url))?;

    let Some(version) = extract_version(&upstream, VERSION_KEY) else {
        eprintln!("  [WARN] {} not found upstream, keeping local version", VERSION_KEY);
        return Ok(());
    };

    let local = kernel_source.join(LOCAL_VERSION_FILE);
    if !local.exists() {
        eprintln!("  [WARN] {} missing, skipping version sync", local.display());
        return Ok(());
    }
    let content = fs::read_to_string(&local)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    fs::write(&local, rewrite_version(&content, VERSION_KEY, &version))
        .with_context(|| format!("Failed to write {}", local.display()))?;
    println!("  {} := {}", VERSION_KEY, version);
    Ok(())
}
