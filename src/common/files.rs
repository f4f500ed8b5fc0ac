//! Filesystem helpers shared by the device-tree and packaging stages.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Write a file with specific Unix permissions, creating parent directories as needed.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Recursively copy `src` to `dst`, keeping symlinks as symlinks.
///
/// Existing files in `dst` are overwritten; files only in `dst` are kept.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)
                    .with_context(|| format!("Failed to replace {}", target.display()))?;
            }
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("Failed to link {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Remove everything inside `dir`, creating it if missing.
pub fn empty_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let removed = if path.is_dir() && !path.is_symlink() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}
