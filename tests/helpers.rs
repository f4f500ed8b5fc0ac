//! Shared test utilities for akbuild tests.
//!
//! [`TestEnv`] lays out a fake kernel tree and toolchain whose "binaries"
//! are shell scripts, so the whole pipeline can run without a compiler.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use akbuild::config::Config;
use akbuild::download::Fetch;

pub const DEVICE: &str = "alioth";
pub const PANEL_FILE: &str = "dsi-panel-j3s-37-02-0a-dsc-video.dtsi";
pub const PANEL_SOURCE: &str = "w = <70>;\nh = <155>;\nrates = <144 120 90 60>;\n";

/// `make` stand-in: writes `.config` for defconfig targets, otherwise an
/// Image and two device-tree blobs. Every call is appended to make-calls.log.
const FAKE_MAKE: &str = r#"#!/bin/sh
out=""
target=""
for a in "$@"; do
  case "$a" in
    O=*) out="${a#O=}" ;;
    *=*|-j*) ;;
    *) target="$a" ;;
  esac
done
printf '%s\n' "$*" >> "$(dirname "$out")/make-calls.log"
case "$target" in
  *_defconfig) printf 'CONFIG_LOCALVERSION=""\n' > "$out/.config" ;;
  "")
    mkdir -p "$out/arch/arm64/boot/dts/vendor/qcom"
    printf 'IMAGE' > "$out/arch/arm64/boot/Image"
    printf 'A' > "$out/arch/arm64/boot/dts/vendor/qcom/kona.dtb"
    printf 'B' > "$out/arch/arm64/boot/dts/vendor/qcom/kona-v2.dtb"
    ;;
esac
"#;

/// `scripts/config` stand-in recording one line per invocation.
const FAKE_CONFIG_TOOL: &str = r#"#!/bin/sh
printf '%s\n' "$*" >> "$(dirname "$0")/../config-calls.log"
"#;

/// Test environment with a fake kernel tree, toolchain and work directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub kernel_source: PathBuf,
    pub toolchain: PathBuf,
    /// Where archives and the packaging template live
    pub work_dir: PathBuf,
    pub home: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let kernel_source = base.join("kernel");
        let toolchain = base.join("toolchain");
        let work_dir = base.join("work");
        let home = base.join("home");

        for dir in [&kernel_source, &toolchain, &work_dir, &home] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        Self {
            _temp_dir: temp_dir,
            kernel_source,
            toolchain,
            work_dir,
            home,
        }
    }

    /// Kernel tree, toolchain and packaging template, ready for a build.
    pub fn with_fake_build() -> Self {
        let env = Self::new();
        env.create_kernel_tree();
        env.create_toolchain();
        // An existing checkout means no clone is attempted
        fs::create_dir_all(env.work_dir.join("anykernel/kernels")).unwrap();
        fs::write(env.work_dir.join("anykernel/anykernel.sh"), "# template\n").unwrap();
        env
    }

    pub fn create_kernel_tree(&self) {
        let k = &self.kernel_source;
        fs::write(k.join("Makefile"), "# kernel\n").unwrap();
        create_script(&k.join("scripts/config"), FAKE_CONFIG_TOOL);
        fs::create_dir_all(k.join("arch/arm64/configs")).unwrap();
        fs::write(k.join(format!("arch/arm64/configs/{}_defconfig", DEVICE)), "").unwrap();

        let dts = k.join(akbuild::dts::DTS_ROOT);
        fs::create_dir_all(&dts).unwrap();
        fs::write(dts.join(PANEL_FILE), PANEL_SOURCE).unwrap();
        fs::write(dts.join("kona.dtsi"), "/ { };\n").unwrap();
    }

    pub fn create_toolchain(&self) {
        let bin = self.toolchain.join("bin");
        for tool in akbuild::toolchain::REQUIRED_TOOLS {
            create_mock_binary(&bin.join(tool));
        }
        create_script(&bin.join("make"), FAKE_MAKE);
    }

    pub fn config(&self) -> Config {
        let vars: HashMap<String, String> = [
            ("HOME", self.home.display().to_string()),
            ("KERNEL_SOURCE", self.kernel_source.display().to_string()),
            ("TOOLCHAIN_PATH", self.toolchain.display().to_string()),
            ("AKBUILD_CACHE", self.home.join("cache").display().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Config::from_vars(&vars, &self.work_dir)
    }

    pub fn dts_dir(&self) -> PathBuf {
        self.kernel_source.join(akbuild::dts::DTS_ROOT)
    }

    /// Lines written by the fake `scripts/config`.
    pub fn config_calls(&self) -> Vec<String> {
        read_lines(&self.kernel_source.join("config-calls.log"))
    }

    /// Lines written by the fake `make`.
    pub fn make_calls(&self) -> Vec<String> {
        read_lines(&self.kernel_source.join("make-calls.log"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Create a mock executable that exits successfully.
pub fn create_mock_binary(path: &Path) {
    create_script(path, "#!/bin/sh\nexit 0\n");
}

/// Write an executable script.
pub fn create_script(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to set permissions");
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("Failed to read file: {}", path.display()));
    assert!(
        content.contains(expected),
        "File {} should contain '{}'\nActual content:\n{}",
        path.display(),
        expected,
        content
    );
}

/// Snapshot every file under `dir` as (relative path, bytes).
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

/// Fetcher serving canned responses and recording every URL asked for.
#[derive(Default)]
pub struct RecordingFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: RefCell<Vec<String>>,
}

impl RecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.to_string(), body.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Fetch for RecordingFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.borrow_mut().push(url.to_string());
        match self.responses.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("HTTP 404 for {}", url),
        }
    }
}
