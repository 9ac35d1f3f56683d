//! Persisted sidecar metadata
//!
//! Two sidecars live next to the artifacts. The per-version
//! `<version>.toolmeta.json` captures the last observed download process so
//! a restarted process (or a crashed one) can pick up where the bytes
//! stopped. The per-name `_groups/<tool>.json` carries the single
//! enabled/disabled flag shared by all versions of a tool.
//!
//! Every write is marshal → `<path>.tmp` → rename, so readers never observe
//! a torn file.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tooldock_core::{DownloadProgress, DownloadStatus, InstallKey, ToolConfig};
use tooldock_paths::Roots;

/// Last-known state of a download pipeline, as persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadProcess {
    /// 0-based index of the mirror being attempted
    pub current_download_url_index: u32,
    /// Server-reported size, or the byte count when the server sent none
    pub file_size: u64,
    pub status: DownloadStatus,
    pub attempt_index: u32,
    pub total_attempts: u32,
    pub current_url: String,
    pub failed_urls: Vec<String>,
    pub all_urls: Vec<String>,
}

impl DownloadProcess {
    /// The cleared record written after a completed install
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Project a progress event into the persisted form
    pub fn from_progress(progress: &DownloadProgress) -> Self {
        Self {
            current_download_url_index: progress.attempt_index.saturating_sub(1),
            // Keeps fileSize ≥ the temp file's size even when the server
            // never sent Content-Length
            file_size: progress.total_bytes.max(progress.downloaded_bytes),
            status: progress.status,
            attempt_index: progress.attempt_index,
            total_attempts: progress.total_attempts,
            current_url: progress.current_url.clone(),
            failed_urls: progress.failed_urls.clone(),
            all_urls: progress.all_urls.clone(),
        }
    }
}

/// Per-version sidecar contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolMetadata {
    pub download_url: Vec<String>,
    pub path_to_entry: String,
    pub print_info_cmd: Vec<String>,
    pub download_process: DownloadProcess,
}

impl ToolMetadata {
    /// Overwrite the config-derived fields with the live catalog values
    /// (the persisted ones may be stale after a catalog update)
    fn reconcile(&mut self, config: &ToolConfig) {
        self.download_url = config.download_urls.clone();
        self.path_to_entry = config.path_to_entry.clone();
        self.print_info_cmd = config.print_info_cmd.clone();
    }
}

/// Store of per-version sidecars with an in-memory cache
pub struct MetadataStore {
    roots: Roots,
    cache: Mutex<HashMap<InstallKey, ToolMetadata>>,
}

impl MetadataStore {
    /// Create a store over the given roots
    pub fn new(roots: Roots) -> Self {
        Self {
            roots,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the sidecar for a key, reconciling with the live config
    ///
    /// Missing or unreadable sidecars yield a default record.
    pub fn load(&self, key: &InstallKey, config: Option<&ToolConfig>) -> ToolMetadata {
        let mut cache = self.cache.lock().expect("metadata cache poisoned");
        let metadata = cache
            .entry(key.clone())
            .or_insert_with(|| self.read_from_disk(key));
        if let Some(config) = config {
            metadata.reconcile(config);
        }
        metadata.clone()
    }

    /// Record one pipeline transition
    ///
    /// `completed` clears the download-process record; `trying`,
    /// `extracting`, `paused`, `failed` and `disabled` force a write even
    /// when the record looks unchanged so a restart observes the last
    /// status.
    pub fn record_progress(&self, key: &InstallKey, progress: &DownloadProgress) -> Result<()> {
        let record = if progress.status == DownloadStatus::Completed {
            DownloadProcess::default()
        } else {
            DownloadProcess::from_progress(progress)
        };

        let mut cache = self.cache.lock().expect("metadata cache poisoned");
        let metadata = cache
            .entry(key.clone())
            .or_insert_with(|| self.read_from_disk(key));

        let changed = metadata.download_process != record;
        metadata.download_process = record;
        if changed || progress.status.force_persists() || progress.status == DownloadStatus::Completed {
            self.persist(key, metadata)?;
        }
        Ok(())
    }

    /// Record a bare status transition (group disable, uninstall broadcast)
    pub fn record_status(&self, key: &InstallKey, status: DownloadStatus) -> Result<()> {
        let progress = DownloadProgress {
            status,
            ..Default::default()
        };
        self.record_progress(key, &progress)
    }

    /// Current record, from cache or disk
    pub fn snapshot(&self, key: &InstallKey) -> ToolMetadata {
        let mut cache = self.cache.lock().expect("metadata cache poisoned");
        cache
            .entry(key.clone())
            .or_insert_with(|| self.read_from_disk(key))
            .clone()
    }

    /// Pretty-printed sidecar JSON for the inspection endpoint
    pub fn pretty_json(&self, key: &InstallKey) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot(key))?)
    }

    /// Remove the sidecar (and its temp companion) and forget the cache
    /// entry. Idempotent.
    pub fn delete(&self, key: &InstallKey) -> Result<()> {
        let path = self.roots.writable_metadata_path(&key.name, &key.version);
        remove_file_if_exists(&path)?;
        remove_file_if_exists(&temp_path(&path))?;
        self.cache
            .lock()
            .expect("metadata cache poisoned")
            .remove(key);
        Ok(())
    }

    fn read_from_disk(&self, key: &InstallKey) -> ToolMetadata {
        // The writable root owns the authoritative sidecar; read-only roots
        // may carry one baked into an image
        let mut candidates = vec![self.roots.writable_metadata_path(&key.name, &key.version)];
        for root in self.roots.read_only_roots() {
            candidates.push(self.roots.metadata_path(root, &key.name, &key.version));
        }
        for path in candidates {
            match std::fs::read(&path) {
                Ok(data) => match serde_json::from_slice(&data) {
                    Ok(metadata) => return metadata,
                    Err(error) => {
                        tracing::warn!(path = %path.display(), %error, "ignoring corrupt sidecar");
                    }
                },
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "failed to read sidecar");
                }
            }
        }
        ToolMetadata::default()
    }

    fn persist(&self, key: &InstallKey, metadata: &ToolMetadata) -> Result<()> {
        let path = self.roots.writable_metadata_path(&key.name, &key.version);
        atomic_write_json(&path, metadata)
    }
}

fn default_enabled() -> bool {
    true
}

/// Per-name group sidecar: one flag spanning every version of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroupMetadata {
    pub tool_name: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

/// Store of per-name group sidecars
pub struct GroupStore {
    roots: Roots,
    cache: Mutex<HashMap<String, ToolGroupMetadata>>,
}

impl GroupStore {
    /// Create a store over the given roots
    pub fn new(roots: Roots) -> Self {
        Self {
            roots,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The group record for a tool name; a missing sidecar defaults to
    /// enabled and is written eagerly
    pub fn load(&self, name: &str) -> ToolGroupMetadata {
        let mut cache = self.cache.lock().expect("group cache poisoned");
        if let Some(group) = cache.get(name) {
            return group.clone();
        }

        let path = self.roots.group_path(self.roots.writable_root(), name);
        let group = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|error| {
                tracing::warn!(path = %path.display(), %error, "ignoring corrupt group sidecar");
                ToolGroupMetadata {
                    tool_name: name.to_string(),
                    is_enabled: true,
                }
            }),
            Err(_) => {
                let group = ToolGroupMetadata {
                    tool_name: name.to_string(),
                    is_enabled: true,
                };
                if let Err(error) = atomic_write_json(&path, &group) {
                    tracing::warn!(path = %path.display(), %error, "failed to write group sidecar");
                }
                group
            }
        };
        cache.insert(name.to_string(), group.clone());
        group
    }

    /// True when the group is enabled for display
    pub fn is_enabled(&self, name: &str) -> bool {
        self.load(name).is_enabled
    }

    /// Flip the group flag and persist it
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let group = ToolGroupMetadata {
            tool_name: name.to_string(),
            is_enabled: enabled,
        };
        let path = self.roots.group_path(self.roots.writable_root(), name);
        atomic_write_json(&path, &group)?;
        self.cache
            .lock()
            .expect("group cache poisoned")
            .insert(name.to_string(), group);
        Ok(())
    }
}

fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".tmp");
    os_string.into()
}

/// Marshal indented JSON, write to `<path>.tmp`, rename into place
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    let temp = temp_path(path);
    std::fs::write(&temp, data)?;
    std::fs::rename(&temp, path).map_err(Error::from)
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}
