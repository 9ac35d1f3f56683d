//! Ordered candidate roots and the tool-folder layout
//!
//! A store is a set of read-only roots (container image layers, shared
//! network mounts) followed by exactly one writable root. Resolution walks
//! the roots in that order and the first root where the version's entry file
//! stats wins, so a version baked into a read-only image shadows a
//! user-volume copy of the same version.

use crate::platform::Platform;
use crate::{GROUPS_DIR, METADATA_SUFFIX, STAGING_PREFIX, TRASH_PREFIX};
use std::path::{Path, PathBuf};

/// Where a version was found during resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Root the version lives under
    pub root: PathBuf,
    /// The version folder
    pub folder: PathBuf,
    /// Absolute path of the entry file
    pub entry: PathBuf,
    /// True when the root is one of the read-only roots
    pub read_only: bool,
}

/// The configured storage roots and the per-platform layout beneath them
#[derive(Debug, Clone)]
pub struct Roots {
    read_only: Vec<PathBuf>,
    writable: PathBuf,
    tmp_exec: Option<PathBuf>,
    os: String,
    arch: String,
}

impl Roots {
    /// Create a root set for the current platform
    pub fn new(
        writable: impl Into<PathBuf>,
        read_only: Vec<PathBuf>,
        tmp_exec: Option<PathBuf>,
    ) -> Self {
        let platform = Platform::current();
        Self::with_platform(writable, read_only, tmp_exec, platform.os, platform.arch)
    }

    /// Create a root set with explicit os/arch keys
    pub fn with_platform(
        writable: impl Into<PathBuf>,
        read_only: Vec<PathBuf>,
        tmp_exec: Option<PathBuf>,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            read_only,
            writable: writable.into(),
            tmp_exec,
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The os path segment
    pub fn os(&self) -> &str {
        &self.os
    }

    /// The arch path segment
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// The single writable root
    pub fn writable_root(&self) -> &Path {
        &self.writable
    }

    /// The configured read-only roots, in order
    pub fn read_only_roots(&self) -> &[PathBuf] {
        &self.read_only
    }

    /// The writable-exec root used when the storage root is `noexec`
    pub fn tmp_exec_root(&self) -> Option<&Path> {
        self.tmp_exec.as_deref()
    }

    /// All candidate roots: read-only roots in configured order, then the
    /// writable root
    pub fn candidate_roots(&self) -> Vec<&Path> {
        let mut roots: Vec<&Path> = self.read_only.iter().map(PathBuf::as_path).collect();
        roots.push(&self.writable);
        roots
    }

    /// `<root>/<os>/<arch>`
    pub fn platform_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.os).join(&self.arch)
    }

    /// `<root>/<os>/<arch>/<tool>`
    pub fn tool_dir(&self, root: &Path, name: &str) -> PathBuf {
        self.platform_dir(root).join(name)
    }

    /// `<root>/<os>/<arch>/<tool>/<version>`
    pub fn version_folder(&self, root: &Path, name: &str, version: &str) -> PathBuf {
        self.tool_dir(root, name).join(version)
    }

    /// `<root>/<os>/<arch>/<tool>/<version>.toolmeta.json`
    pub fn metadata_path(&self, root: &Path, name: &str, version: &str) -> PathBuf {
        self.tool_dir(root, name)
            .join(format!("{}{}", version, METADATA_SUFFIX))
    }

    /// `<root>/<os>/<arch>/_groups`
    pub fn groups_dir(&self, root: &Path) -> PathBuf {
        self.platform_dir(root).join(GROUPS_DIR)
    }

    /// `<root>/<os>/<arch>/_groups/<tool>.json`
    pub fn group_path(&self, root: &Path, name: &str) -> PathBuf {
        self.groups_dir(root).join(format!("{}.json", name))
    }

    /// Extraction staging folder alongside the writable version folder
    pub fn staging_folder(&self, name: &str, version: &str) -> PathBuf {
        self.tool_dir(&self.writable, name)
            .join(format!("{}{}", STAGING_PREFIX, version))
    }

    /// Trash folder for an uninstall, distinguished by a caller token
    pub fn trash_folder(&self, name: &str, version: &str, token: &str) -> PathBuf {
        self.tool_dir(&self.writable, name)
            .join(format!("{}{}-{}", TRASH_PREFIX, version, token))
    }

    /// Deterministic version folder under the writable root (does not stat)
    pub fn writable_folder(&self, name: &str, version: &str) -> PathBuf {
        self.version_folder(&self.writable, name, version)
    }

    /// Sidecar path under the writable root
    pub fn writable_metadata_path(&self, name: &str, version: &str) -> PathBuf {
        self.metadata_path(&self.writable, name, version)
    }

    /// Version folder under the tmp-exec root, when one is configured
    pub fn exec_folder(&self, name: &str, version: &str) -> Option<PathBuf> {
        self.tmp_exec
            .as_ref()
            .map(|root| self.version_folder(root, name, version))
    }

    /// Find the first candidate root where the version's entry file exists
    pub fn resolve(&self, name: &str, version: &str, entry_rel: &str) -> Option<Located> {
        let read_only_count = self.read_only.len();
        for (index, root) in self.candidate_roots().into_iter().enumerate() {
            let folder = self.version_folder(root, name, version);
            let entry = folder.join(entry_rel);
            if entry.is_file() {
                return Some(Located {
                    root: root.to_path_buf(),
                    folder,
                    entry,
                    read_only: index < read_only_count,
                });
            }
        }
        None
    }

    /// True when `resolve` succeeds
    pub fn installed(&self, name: &str, version: &str, entry_rel: &str) -> bool {
        self.resolve(name, version, entry_rel).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roots_in(dir: &Path) -> Roots {
        Roots::with_platform(
            dir.join("writable"),
            vec![dir.join("ro1"), dir.join("ro2")],
            Some(dir.join("exec")),
            "linux",
            "amd64",
        )
    }

    fn install(roots: &Roots, root: &Path, name: &str, version: &str, entry: &str) {
        let folder = roots.version_folder(root, name, version);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(entry), b"#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_layout_paths() {
        let roots = roots_in(Path::new("/store"));
        assert_eq!(
            roots.writable_folder("dotnet", "8.0.5"),
            PathBuf::from("/store/writable/linux/amd64/dotnet/8.0.5")
        );
        assert_eq!(
            roots.writable_metadata_path("dotnet", "8.0.5"),
            PathBuf::from("/store/writable/linux/amd64/dotnet/8.0.5.toolmeta.json")
        );
        assert_eq!(
            roots.group_path(roots.writable_root(), "dotnet"),
            PathBuf::from("/store/writable/linux/amd64/_groups/dotnet.json")
        );
        assert_eq!(
            roots.staging_folder("dotnet", "8.0.5"),
            PathBuf::from("/store/writable/linux/amd64/dotnet/.tmp_8.0.5")
        );
        assert_eq!(
            roots.trash_folder("dotnet", "8.0.5", "abc"),
            PathBuf::from("/store/writable/linux/amd64/dotnet/.trash-8.0.5-abc")
        );
        assert_eq!(
            roots.exec_folder("dotnet", "8.0.5"),
            Some(PathBuf::from("/store/exec/linux/amd64/dotnet/8.0.5"))
        );
    }

    #[test]
    fn test_read_only_roots_win_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let roots = roots_in(dir.path());

        install(&roots, &dir.path().join("writable"), "jq", "1.7", "jq");
        let located = roots.resolve("jq", "1.7", "jq").unwrap();
        assert!(!located.read_only);
        assert_eq!(located.root, dir.path().join("writable"));

        // The same version appearing in a read-only root now shadows it
        install(&roots, &dir.path().join("ro2"), "jq", "1.7", "jq");
        let located = roots.resolve("jq", "1.7", "jq").unwrap();
        assert!(located.read_only);
        assert_eq!(located.root, dir.path().join("ro2"));

        // Among read-only roots, configured order decides
        install(&roots, &dir.path().join("ro1"), "jq", "1.7", "jq");
        let located = roots.resolve("jq", "1.7", "jq").unwrap();
        assert_eq!(located.root, dir.path().join("ro1"));
    }

    #[test]
    fn test_resolve_requires_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let roots = roots_in(dir.path());

        // Folder exists but the entry file does not
        std::fs::create_dir_all(roots.writable_folder("jq", "1.7")).unwrap();
        assert!(roots.resolve("jq", "1.7", "jq").is_none());
        assert!(!roots.installed("jq", "1.7", "jq"));

        install(&roots, &dir.path().join("writable"), "jq", "1.7", "jq");
        assert!(roots.installed("jq", "1.7", "jq"));
    }

    #[test]
    fn test_nested_entry_path() {
        let dir = tempfile::tempdir().unwrap();
        let roots = roots_in(dir.path());
        let folder = roots.writable_folder("dotnet", "8.0.5");
        std::fs::create_dir_all(folder.join("bin")).unwrap();
        std::fs::write(folder.join("bin/dotnet"), b"").unwrap();

        let located = roots.resolve("dotnet", "8.0.5", "bin/dotnet").unwrap();
        assert_eq!(located.entry, folder.join("bin/dotnet"));
    }
}
