//! Configuration management for akbuild.
//!
//! Reads configuration from a `.env` file and environment variables, once,
//! at startup. Environment variables take precedence over `.env`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Packaging template cloned next to the kernel tree.
pub const DEFAULT_ANYKERNEL_URL: &str = "https://github.com/osm0sis/AnyKernel3";
pub const DEFAULT_ANYKERNEL_BRANCH: &str = "master";

/// akbuild configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Kernel source tree (default: working directory)
    pub kernel_source: PathBuf,
    /// Toolchain root override (TOOLCHAIN_PATH)
    pub toolchain_override: Option<PathBuf>,
    /// ccache directory (default: ~/.ccache)
    pub ccache_dir: PathBuf,
    /// Home directory, used for toolchain fallbacks
    pub home_dir: PathBuf,
    /// Scratch area for tool aliases
    pub cache_dir: PathBuf,
    /// Packaging template repository
    pub anykernel_url: String,
    pub anykernel_branch: String,
}

impl Config {
    /// Load configuration from `base_dir/.env` and the process environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                env_vars.insert(key, value);
                            }
                            Err(e) => {
                                eprintln!("  [WARN] Skipping malformed line in {}: {}", env_path.display(), e);
                            }
                        }
                    }
                }
                Err(e) => eprintln!("  [WARN] Could not read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(&env_vars, base_dir)
    }

    /// Build configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>, base_dir: &Path) -> Self {
        let get = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();

        let resolve = |s: String| {
            let path = PathBuf::from(s);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let home_dir = get("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/root"));

        let kernel_source = get("KERNEL_SOURCE")
            .map(resolve)
            .unwrap_or_else(|| base_dir.to_path_buf());

        let toolchain_override = get("TOOLCHAIN_PATH").map(PathBuf::from);

        let ccache_dir = get("CCACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".ccache"));

        let cache_dir = get("AKBUILD_CACHE")
            .map(resolve)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| home_dir.join(".cache"))
                    .join("akbuild")
            });

        Self {
            kernel_source,
            toolchain_override,
            ccache_dir,
            home_dir,
            cache_dir,
            anykernel_url: get("ANYKERNEL_URL").unwrap_or_else(|| DEFAULT_ANYKERNEL_URL.to_string()),
            anykernel_branch: get("ANYKERNEL_BRANCH")
                .unwrap_or_else(|| DEFAULT_ANYKERNEL_BRANCH.to_string()),
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  KERNEL_SOURCE: {}", self.kernel_source.display());
        match &self.toolchain_override {
            Some(p) => println!("  TOOLCHAIN_PATH: {}", p.display()),
            None => println!("  TOOLCHAIN_PATH: (unset, using fallbacks)"),
        }
        println!("  CCACHE_DIR: {}", self.ccache_dir.display());
        println!("  AnyKernel3: {} ({})", self.anykernel_url, self.anykernel_branch);
    }
}
