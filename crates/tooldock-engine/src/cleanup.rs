//! Trash and orphan sweeps over the writable root
//!
//! Uninstall renames version folders into `.trash-*` before deleting and
//! extraction stages into `.tmp_*`; both can survive a crash. The startup
//! sweep removes them. The version sweeps prune folders that fell out of
//! the catalog (or an explicit allow-list), skipping anything another
//! operation currently holds.

use crate::locks::FolderLocks;
use crate::Result;
use std::path::Path;
use tooldock_paths::{Roots, GROUPS_DIR, METADATA_SUFFIX, STAGING_PREFIX, TRASH_PREFIX};

/// Remove stale `.trash-*` and `.tmp_*` folders anywhere under the
/// writable root. Best-effort: failures are logged and skipped.
pub fn sweep_stale(roots: &Roots) {
    let mut doomed = Vec::new();
    let mut walker = walkdir::WalkDir::new(roots.writable_root()).into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(TRASH_PREFIX) || name.starts_with(STAGING_PREFIX) {
            doomed.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }
    for path in doomed {
        tracing::info!(path = %path.display(), "removing stale folder");
        if let Err(error) = std::fs::remove_dir_all(&path) {
            tracing::warn!(path = %path.display(), %error, "failed to remove stale folder");
        }
    }
}

/// Remove version folders the `keep` predicate rejects
///
/// Only the current os/arch subtree is inspected version by version;
/// foreign os or arch subtrees are removed wholesale. Staging and trash
/// folders are left to [`sweep_stale`], locked folders are skipped, and
/// empty tool/arch/os directories are pruned afterwards.
pub fn sweep_versions(
    roots: &Roots,
    locks: &FolderLocks,
    keep: impl Fn(&str, &str) -> bool,
) -> Result<()> {
    let writable = roots.writable_root();
    for os_entry in read_dirs(writable)? {
        let os_name = os_entry.file_name().to_string_lossy().into_owned();
        if os_name != roots.os() {
            tracing::info!(os = %os_name, "removing foreign-os subtree");
            std::fs::remove_dir_all(os_entry.path())?;
            continue;
        }
        for arch_entry in read_dirs(&os_entry.path())? {
            let arch_name = arch_entry.file_name().to_string_lossy().into_owned();
            if arch_name != roots.arch() {
                tracing::info!(arch = %arch_name, "removing foreign-arch subtree");
                std::fs::remove_dir_all(arch_entry.path())?;
                continue;
            }
            for tool_entry in read_dirs(&arch_entry.path())? {
                let tool_name = tool_entry.file_name().to_string_lossy().into_owned();
                if tool_name == GROUPS_DIR {
                    continue;
                }
                sweep_tool_dir(locks, &tool_entry.path(), &tool_name, &keep)?;
                remove_if_empty(&tool_entry.path());
            }
            remove_if_empty(&arch_entry.path());
        }
        remove_if_empty(&os_entry.path());
    }
    Ok(())
}

fn sweep_tool_dir(
    locks: &FolderLocks,
    tool_dir: &Path,
    tool_name: &str,
    keep: &impl Fn(&str, &str) -> bool,
) -> Result<()> {
    for entry in read_dirs(tool_dir)? {
        let version = entry.file_name().to_string_lossy().into_owned();
        if version.starts_with(STAGING_PREFIX) || version.starts_with(TRASH_PREFIX) {
            continue;
        }
        if keep(tool_name, &version) {
            continue;
        }

        let folder = entry.path();
        let Some(_guard) = locks.try_acquire(&folder) else {
            tracing::debug!(folder = %folder.display(), "skipping locked folder");
            continue;
        };
        tracing::info!(tool = %tool_name, %version, "removing unknown version");
        std::fs::remove_dir_all(&folder)?;

        let sidecar = tool_dir.join(format!("{}{}", version, METADATA_SUFFIX));
        let _ = std::fs::remove_file(&sidecar);
        let mut sidecar_tmp = sidecar.into_os_string();
        sidecar_tmp.push(".tmp");
        let _ = std::fs::remove_file(std::path::PathBuf::from(sidecar_tmp));
    }
    Ok(())
}

fn read_dirs(dir: &Path) -> Result<Vec<std::fs::DirEntry>> {
    let mut dirs = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(error) => return Err(error.into()),
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry);
        }
    }
    Ok(dirs)
}

fn remove_if_empty(dir: &Path) {
    let empty = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        let _ = std::fs::remove_dir(dir);
    }
}
