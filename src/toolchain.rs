//! Toolchain resolution and the build environment handed to child processes.
//!
//! The resolved toolchain is never exported into our own process
//! environment. Everything a child needs (search path, ccache settings)
//! lives in [`BuildEnvironment`] and is passed explicitly.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::process;

/// Compiler whose presence marks a usable toolchain root.
pub const COMPILER: &str = "clang";

/// Tools the kernel build invokes by name.
pub const REQUIRED_TOOLS: [&str; 7] = [
    "clang",
    "ld.lld",
    "llvm-ar",
    "llvm-nm",
    "llvm-objcopy",
    "llvm-objdump",
    "llvm-strip",
];

/// Places a toolchain is commonly unpacked to, in search order.
pub fn fallback_dirs(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join("toolchain/proton-clang"),
        home.join("proton-clang"),
        PathBuf::from("/opt/proton-clang"),
        home.join("toolchains/clang"),
        PathBuf::from("/usr/lib/llvm"),
    ]
}

/// Resolved toolchain. Read-only after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainInfo {
    pub root: PathBuf,
    /// Tool name to the path it resolved to.
    pub binaries: BTreeMap<String, PathBuf>,
}

impl ToolchainInfo {
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn binary(&self, name: &str) -> Option<&Path> {
        self.binaries.get(name).map(PathBuf::as_path)
    }
}

/// Pick the toolchain root: a valid override wins, otherwise the first
/// fallback holding an executable compiler.
pub fn resolve_root(override_path: Option<&Path>, fallbacks: &[PathBuf]) -> Result<PathBuf> {
    if let Some(path) = override_path {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        eprintln!(
            "  [WARN] TOOLCHAIN_PATH {} is not a directory, trying fallbacks",
            path.display()
        );
    }

    for dir in fallbacks {
        if process::is_executable(&dir.join("bin").join(COMPILER)) {
            return Ok(dir.clone());
        }
    }

    let tried = fallbacks
        .iter()
        .map(|p| format!("  {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    bail!(
        "No usable toolchain found. Set TOOLCHAIN_PATH or install clang to one of:\n{}",
        tried
    )
}

/// Find `<tool>-<N>` in `bin_dir`, highest N first.
fn find_versioned(bin_dir: &Path, tool: &str) -> Option<PathBuf> {
    let prefix = format!("{}-", tool);
    let entries = fs::read_dir(bin_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let version: u32 = name.strip_prefix(&prefix)?.parse().ok()?;
            let path = e.path();
            process::is_executable(&path).then_some((version, path))
        })
        .max_by_key(|(version, _)| *version)
        .map(|(_, path)| path)
}

/// Search path for children: toolchain `bin/`, the alias directory, then
/// the inherited PATH.
pub fn search_path(root: &Path, alias_dir: &Path, inherited: &OsStr) -> Result<OsString> {
    let mut dirs = vec![root.join("bin"), alias_dir.to_path_buf()];
    dirs.extend(std::env::split_paths(inherited).filter(|p| !p.as_os_str().is_empty()));
    std::env::join_paths(dirs).context("Toolchain path contains an invalid character")
}

/// Resolve every required tool, aliasing versioned binaries into `alias_dir`
/// when the plain name is missing.
pub fn resolve_tools(root: &Path, alias_dir: &Path, search_path: &OsStr) -> Result<ToolchainInfo> {
    let bin_dir = root.join("bin");
    let mut binaries = BTreeMap::new();

    for tool in REQUIRED_TOOLS {
        if let Some(path) = process::which_in(tool, search_path) {
            binaries.insert(tool.to_string(), path);
            continue;
        }

        let Some(target) = find_versioned(&bin_dir, tool) else {
            bail!(
                "Required tool '{}' not found in PATH or {}",
                tool,
                bin_dir.display()
            );
        };

        fs::create_dir_all(alias_dir)
            .with_context(|| format!("Failed to create {}", alias_dir.display()))?;
        let link = alias_dir.join(tool);
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)
                .with_context(|| format!("Failed to replace stale alias {}", link.display()))?;
        }
        std::os::unix::fs::symlink(&target, &link).with_context(|| {
            format!("Failed to alias {} -> {}", link.display(), target.display())
        })?;
        println!("  Aliased {} -> {}", tool, target.display());
        binaries.insert(tool.to_string(), link);
    }

    Ok(ToolchainInfo {
        root: root.to_path_buf(),
        binaries,
    })
}

/// Everything a build child process needs from the host, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub toolchain: ToolchainInfo,
    /// PATH value for children.
    pub search_path: OsString,
    /// Set when ccache is enabled and available.
    pub ccache_dir: Option<PathBuf>,
    /// Parallel make jobs.
    pub jobs: usize,
}

impl BuildEnvironment {
    /// Resolve the toolchain and ccache for this run.
    pub fn resolve(config: &Config, use_ccache: bool) -> Result<Self> {
        println!("Resolving toolchain...");
        let root = resolve_root(
            config.toolchain_override.as_deref(),
            &fallback_dirs(&config.home_dir),
        )?;
        println!("  Toolchain: {}", root.display());

        let alias_dir = config.cache_dir.join("toolchain-bin");
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let search_path = search_path(&root, &alias_dir, &inherited)?;
        let toolchain = resolve_tools(&root, &alias_dir, &search_path)?;

        let ccache_dir = if !use_ccache {
            println!("  ccache: disabled");
            None
        } else if process::which_in("ccache", &search_path).is_some() {
            fs::create_dir_all(&config.ccache_dir).with_context(|| {
                format!("Failed to create ccache dir {}", config.ccache_dir.display())
            })?;
            println!("  ccache: {}", config.ccache_dir.display());
            Some(config.ccache_dir.clone())
        } else {
            eprintln!("  [WARN] ccache not found, building without it");
            None
        };

        Ok(Self {
            toolchain,
            search_path,
            ccache_dir,
            jobs: detect_jobs(),
        })
    }

    /// Value for `CC=`.
    pub fn compiler(&self) -> String {
        if self.ccache_dir.is_some() {
            format!("ccache {}", COMPILER)
        } else {
            COMPILER.to_string()
        }
    }

    /// Variables every build child receives.
    pub fn child_env(&self) -> Vec<(OsString, OsString)> {
        let mut vars = vec![(OsString::from("PATH"), self.search_path.clone())];
        if let Some(dir) = &self.ccache_dir {
            vars.push((OsString::from("CCACHE_DIR"), dir.as_os_str().to_os_string()));
        }
        vars
    }
}

fn detect_jobs() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            eprintln!("  [WARN] Could not detect CPU count ({}), using 4 jobs", e);
            4
        }
    }
}
