//! The lifecycle orchestrator
//!
//! [`Engine`] composes the registries, the stores, the download pipeline
//! and the exec-permission staging into the install/uninstall/pause
//! operations, all keyed by `tool@version`. Everything an engine needs is
//! injected through [`EngineConfig`] so tests can run many isolated
//! instances side by side.

use crate::active::ActiveTasks;
use crate::download::{DownloadEngine, DownloadJob};
use crate::locks::FolderLocks;
use crate::meta::{DownloadProcess, GroupStore, MetadataStore};
use crate::tool::{dev_env_var, DevTool, RemoteTool, Tool};
use crate::{cleanup, Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tooldock_core::catalog::StringOrList;
use tooldock_core::{
    Catalog, DownloadProgress, DownloadStatus, InstallKey, OsArchValue, ProgressMessage,
    ProgressSink, ToolConfig, VersionEntry,
};
use tooldock_paths::{ExecProber, Roots};

/// Minimum spacing between discovery scans unless forced
const SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Construction-time configuration for an engine
pub struct EngineConfig {
    pub catalog: Catalog,
    pub roots: Roots,
    /// Bytes/sec download limit; 0 disables limiting
    pub download_limit_bps: u64,
    /// Default sink every lifecycle broadcast goes to (typically the SSE
    /// broker)
    pub sink: Arc<dyn ProgressSink>,
}

pub(crate) struct EngineInner {
    catalog: RwLock<Catalog>,
    roots: Roots,
    locks: FolderLocks,
    active: ActiveTasks,
    meta: MetadataStore,
    groups: GroupStore,
    prober: ExecProber,
    download: DownloadEngine,
    limit_bps: AtomicU64,
    sink: Arc<dyn ProgressSink>,
    pauses: Mutex<HashMap<InstallKey, Arc<AtomicBool>>>,
    tools: Mutex<HashMap<InstallKey, Arc<Tool>>>,
    last_scan: Mutex<Option<Instant>>,
}

/// The tool acquisition and lifecycle engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// An exclusive claim on a key in the active registry
///
/// Obtained through [`Engine::try_reserve`] and released on drop. Owning a
/// reservation is what makes an install "active": callers that need to
/// answer a duplicate-install race synchronously (the HTTP handler) claim
/// first and hand the reservation to the background task.
pub struct InstallReservation {
    engine: Engine,
    key: InstallKey,
}

impl InstallReservation {
    /// The reserved `tool@version`
    pub fn key(&self) -> &InstallKey {
        &self.key
    }
}

impl Drop for InstallReservation {
    fn drop(&mut self) {
        self.engine.inner.active.remove(&self.key);
    }
}

/// One version in the grouped tool listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    pub version: String,
    pub installed: bool,
    pub from_read_only_root: bool,
    pub is_executable: bool,
}

/// One tool group in the listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListing {
    pub name: String,
    pub is_enabled: bool,
    pub versions: Vec<VersionListing>,
}

/// Runtime status of one version
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatus {
    pub tool_name: String,
    pub version: String,
    pub installed: bool,
    pub download_process: DownloadProcess,
}

impl Engine {
    /// Create an engine from its configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        let EngineConfig {
            catalog,
            roots,
            download_limit_bps,
            sink,
        } = config;
        Ok(Self {
            inner: Arc::new(EngineInner {
                meta: MetadataStore::new(roots.clone()),
                groups: GroupStore::new(roots.clone()),
                catalog: RwLock::new(catalog),
                roots,
                locks: FolderLocks::new(),
                active: ActiveTasks::new(),
                prober: ExecProber::new(),
                download: DownloadEngine::new()?,
                limit_bps: AtomicU64::new(download_limit_bps),
                sink,
                pauses: Mutex::new(HashMap::new()),
                tools: Mutex::new(HashMap::new()),
                last_scan: Mutex::new(None),
            }),
        })
    }

    /// The configured roots
    pub fn roots(&self) -> &Roots {
        &self.inner.roots
    }

    /// The active-install registry
    pub fn active(&self) -> &ActiveTasks {
        &self.inner.active
    }

    /// The shared HTTP client (reused by the reverse proxy)
    pub fn http_client(&self) -> reqwest::Client {
        self.inner.download.client().clone()
    }

    /// Current download limit in bytes/sec (0 = unlimited)
    pub fn download_limit(&self) -> u64 {
        self.inner.limit_bps.load(Ordering::Relaxed)
    }

    /// Change the download limit for subsequent transfers
    pub fn set_download_limit(&self, limit_bps: u64) {
        self.inner.limit_bps.store(limit_bps, Ordering::Relaxed);
    }

    /// Spawn the startup sweep of `.trash-*` and stale `.tmp_*` folders
    pub fn start_background_sweep(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            cleanup::sweep_stale(engine.roots());
        });
    }

    // ========== Tool handles ==========

    /// Resolve the per-platform config for one `tool@version`
    pub fn tool_config(&self, name: &str, version: &str) -> Result<ToolConfig> {
        let catalog = self.inner.catalog.read().expect("catalog poisoned");
        Ok(catalog.tool_config(name, version, self.inner.roots.os(), self.inner.roots.arch())?)
    }

    /// Handle for an exact `tool@version`, constructed on demand and cached
    ///
    /// A `DEV_<TOOLNAME>` environment variable short-circuits to the dev
    /// override.
    pub fn tool(&self, name: &str, version: &str) -> Result<Arc<Tool>> {
        if let Ok(path) = std::env::var(dev_env_var(name)) {
            return Ok(Arc::new(Tool::Dev(DevTool::new(name, path))));
        }

        let key = InstallKey::new(name, version);
        {
            let tools = self.inner.tools.lock().expect("tool cache poisoned");
            if let Some(tool) = tools.get(&key) {
                return Ok(tool.clone());
            }
        }
        let config = self.tool_config(name, version)?;
        let tool = Arc::new(Tool::Remote(RemoteTool {
            engine: self.clone(),
            config,
        }));
        self.inner
            .tools
            .lock()
            .expect("tool cache poisoned")
            .insert(key, tool.clone());
        Ok(tool)
    }

    /// Highest version declared in the catalog
    pub fn get_latest(&self, name: &str) -> Result<Arc<Tool>> {
        let versions = self.catalog_versions(name)?;
        let latest = tooldock_core::version::latest_of(versions.iter().map(String::as_str))
            .ok_or_else(|| tooldock_core::Error::tool_not_found(name))?
            .to_string();
        self.tool(name, &latest)
    }

    /// Highest installed version, falling back to the highest available
    pub fn get_prefer_installed(&self, name: &str) -> Result<Arc<Tool>> {
        match self.highest_installed(name)? {
            Some(version) => self.tool(name, &version),
            None => self.get_latest(name),
        }
    }

    /// Highest installed version, failing when none is
    pub fn get_only_installed(&self, name: &str) -> Result<Arc<Tool>> {
        match self.highest_installed(name)? {
            Some(version) => self.tool(name, &version),
            None => Err(tooldock_core::Error::NoInstalledVersion {
                name: name.to_string(),
            }
            .into()),
        }
    }

    fn catalog_versions(&self, name: &str) -> Result<Vec<String>> {
        self.scan_installed(false);
        let catalog = self.inner.catalog.read().expect("catalog poisoned");
        let versions: Vec<String> = catalog
            .versions(name)
            .into_iter()
            .map(str::to_string)
            .collect();
        if versions.is_empty() {
            return Err(tooldock_core::Error::tool_not_found(name).into());
        }
        Ok(versions)
    }

    fn highest_installed(&self, name: &str) -> Result<Option<String>> {
        let versions = self.catalog_versions(name)?;
        let mut installed = Vec::new();
        for version in &versions {
            if let Ok(config) = self.tool_config(name, version)
                && self
                    .inner
                    .roots
                    .installed(name, version, &config.path_to_entry)
            {
                installed.push(version.as_str());
            }
        }
        Ok(tooldock_core::version::latest_of(installed).map(str::to_string))
    }

    // ========== Lifecycle operations ==========

    /// Install a version, broadcasting progress to the engine's default sink
    pub async fn install(&self, key: &InstallKey) -> Result<()> {
        self.install_with_sink(key, self.inner.sink.clone()).await
    }

    /// Atomically claim a key in the active registry
    ///
    /// Returns `None` when an install for the key is already in flight.
    /// This is the single decision point between racing installs: whoever
    /// holds the reservation owns the install, everyone else is `Busy`.
    pub fn try_reserve(&self, key: &InstallKey) -> Option<InstallReservation> {
        if !self.inner.active.insert(key) {
            return None;
        }
        Some(InstallReservation {
            engine: self.clone(),
            key: key.clone(),
        })
    }

    /// Install a version, streaming progress to the given sink
    ///
    /// Non-blocking on contention: returns [`Error::Busy`] when another
    /// install holds the key or another operation holds the version's
    /// folder lock. A cooperative pause is converted to
    /// success-with-no-progress.
    pub async fn install_with_sink(
        &self,
        key: &InstallKey,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        let Some(reservation) = self.try_reserve(key) else {
            return Err(Error::busy(key.to_string()));
        };
        self.install_reserved(reservation, sink).await
    }

    /// Run an install whose key was already claimed via
    /// [`Engine::try_reserve`]
    ///
    /// The reservation is held for the whole install and released when this
    /// returns.
    pub async fn install_reserved(
        &self,
        reservation: InstallReservation,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        let key = reservation.key().clone();
        let result = self.run_install(&key, sink).await;
        drop(reservation);
        result
    }

    async fn run_install(&self, key: &InstallKey, sink: Arc<dyn ProgressSink>) -> Result<()> {
        let config = self.tool_config(&key.name, &key.version)?;
        let folder = self.inner.roots.writable_folder(&key.name, &key.version);

        // The folder lock additionally excludes uninstall and the sweep
        let Some(_folder_guard) = self.inner.locks.try_acquire(&folder) else {
            return Err(Error::busy(key.to_string()));
        };

        // A fresh install always starts unpaused
        self.pause_flag(key).store(false, Ordering::Relaxed);
        self.inner.meta.load(key, Some(&config));

        // Fast path: the version already lives in some candidate root
        if self
            .inner
            .roots
            .resolve(&key.name, &key.version, &config.path_to_entry)
            .is_some()
        {
            self.emit(key, completed_event(), sink.as_ref()).await;
            return Ok(());
        }

        let staging = self.inner.roots.staging_folder(&key.name, &key.version);
        let job = DownloadJob {
            key,
            urls: &config.download_urls,
            folder: &folder,
            staging: &staging,
            pause: self.pause_flag(key),
            limit_bps: self.download_limit(),
        };
        match self.inner.download.run(&job, &self.inner.meta, sink.as_ref()).await {
            Ok(()) => {}
            Err(Error::Paused) => return Ok(()),
            Err(error) => return Err(error),
        }

        self.finish_install(key, &config, &folder, sink.as_ref()).await
    }

    /// Post-install exec check and, when the storage root is `noexec`,
    /// relocation into the exec root
    async fn finish_install(
        &self,
        key: &InstallKey,
        config: &ToolConfig,
        folder: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        if !config.is_executable {
            self.emit(key, completed_event(), sink).await;
            return Ok(());
        }

        if self.inner.prober.exec_supported(folder) {
            self.emit(key, completed_event(), sink).await;
            return Ok(());
        }

        let Some(exec_folder) = self.inner.roots.exec_folder(&key.name, &key.version) else {
            let error = Error::ExecUnsupported {
                dir: folder.to_path_buf(),
            };
            self.emit(key, failed_event(&error), sink).await;
            return Err(error);
        };

        // Probe the derived folder before paying for the copy
        if !self.inner.prober.exec_supported(&exec_folder) {
            let error = Error::ExecUnsupported { dir: exec_folder };
            self.emit(key, failed_event(&error), sink).await;
            return Err(error);
        }

        if let Err(error) = copy_tree(folder, &exec_folder) {
            let _ = std::fs::remove_dir_all(&exec_folder);
            self.emit(key, failed_event(&error), sink).await;
            return Err(error);
        }

        self.inner.prober.invalidate(&exec_folder);
        if !self.inner.prober.exec_supported(&exec_folder) {
            let _ = std::fs::remove_dir_all(&exec_folder);
            let error = Error::ExecUnsupported { dir: exec_folder };
            self.emit(key, failed_event(&error), sink).await;
            return Err(error);
        }

        self.emit(key, completed_event(), sink).await;
        Ok(())
    }

    /// Flag an in-flight download to stop at its next read
    ///
    /// A single atomic store: no lock is taken and concurrent calls are
    /// idempotent. The resulting `paused` broadcast comes from the read
    /// loop that observes the flag.
    pub fn pause(&self, key: &InstallKey) {
        self.pause_flag(key).store(true, Ordering::Relaxed);
        tracing::info!(key = %key, "pause requested");
    }

    /// Remove a version from the writable root
    ///
    /// Best-effort and idempotent: the tree is renamed into a `.trash-*`
    /// folder first so a slow delete cannot leave a half-removed version
    /// folder, sidecars and any exec-root copy are dropped, and read-only
    /// roots are never touched. Returns [`Error::Busy`] while an install
    /// holds the folder.
    pub async fn uninstall(&self, key: &InstallKey) -> Result<()> {
        let folder = self.inner.roots.writable_folder(&key.name, &key.version);
        let Some(_folder_guard) = self.inner.locks.try_acquire(&folder) else {
            return Err(Error::busy(key.to_string()));
        };

        if folder.exists() {
            let trash = self.inner.roots.trash_folder(
                &key.name,
                &key.version,
                &uuid::Uuid::new_v4().to_string(),
            );
            std::fs::rename(&folder, &trash)?;
            if let Err(error) = std::fs::remove_dir_all(&trash) {
                // The startup sweep will finish the job
                tracing::warn!(trash = %trash.display(), %error, "deferred trash removal");
            }
        }

        // A crash-interrupted download may have left staging behind
        let staging = self.inner.roots.staging_folder(&key.name, &key.version);
        let _ = std::fs::remove_dir_all(&staging);

        self.inner.meta.delete(key)?;

        if let Some(exec_folder) = self.inner.roots.exec_folder(&key.name, &key.version) {
            let _ = std::fs::remove_dir_all(&exec_folder);
        }

        self.inner
            .sink
            .emit(ProgressMessage::status_only(key, DownloadStatus::Uninstalled))
            .await;
        Ok(())
    }

    /// Toggle the enabled flag shared by every version of a tool name
    pub async fn toggle_group(&self, name: &str, enabled: bool) -> Result<()> {
        self.inner.groups.set_enabled(name, enabled)?;
        if enabled {
            return Ok(());
        }
        // Installed versions broadcast (and persist) the disabled state so
        // clients and restarts observe it
        for version in self.catalog_versions(name).unwrap_or_default() {
            let key = InstallKey::new(name, &version);
            if let Ok(config) = self.tool_config(name, &version)
                && self
                    .inner
                    .roots
                    .installed(name, &version, &config.path_to_entry)
            {
                if let Err(error) = self.inner.meta.record_status(&key, DownloadStatus::Disabled) {
                    tracing::warn!(key = %key, %error, "failed to persist disabled state");
                }
                self.inner
                    .sink
                    .emit(ProgressMessage::status_only(&key, DownloadStatus::Disabled))
                    .await;
            }
        }
        Ok(())
    }

    // ========== Listings ==========

    /// Grouped tool listing for `/api/tools`
    pub fn list_tools(&self) -> Vec<ToolListing> {
        self.scan_installed(false);
        let snapshot = self.catalog_snapshot();
        let mut listings = Vec::new();
        for name in snapshot.tool_names() {
            let mut versions = Vec::new();
            for version in snapshot.versions(name) {
                let Ok(config) = self.tool_config(name, version) else {
                    continue;
                };
                let located = self
                    .inner
                    .roots
                    .resolve(name, version, &config.path_to_entry);
                versions.push(VersionListing {
                    version: version.to_string(),
                    installed: located.is_some(),
                    from_read_only_root: located.map(|l| l.read_only).unwrap_or(false),
                    is_executable: config.is_executable,
                });
            }
            if !versions.is_empty() {
                listings.push(ToolListing {
                    name: name.to_string(),
                    is_enabled: self.inner.groups.is_enabled(name),
                    versions,
                });
            }
        }
        listings
    }

    /// Per-version runtime status for `/api/status`
    pub fn status(&self) -> Vec<VersionStatus> {
        self.scan_installed(false);
        let snapshot = self.catalog_snapshot();
        let mut statuses = Vec::new();
        for name in snapshot.tool_names() {
            for version in snapshot.versions(name) {
                let Ok(config) = self.tool_config(name, version) else {
                    continue;
                };
                let key = InstallKey::new(name, version);
                statuses.push(VersionStatus {
                    tool_name: name.to_string(),
                    version: version.to_string(),
                    installed: self
                        .inner
                        .roots
                        .installed(name, version, &config.path_to_entry),
                    download_process: self.inner.meta.snapshot(&key).download_process,
                });
            }
        }
        statuses
    }

    /// Pretty-printed sidecar JSON for `/api/tool-metadata`
    pub fn metadata_json(&self, key: &InstallKey) -> Result<String> {
        self.inner.meta.pretty_json(key)
    }

    /// Storage and exec paths for `/api/tool-path`
    pub fn tool_paths(&self, key: &InstallKey) -> Result<(PathBuf, PathBuf)> {
        let tool = self.tool(&key.name, &key.version)?;
        Ok((tool.storage_folder(), tool.exec_path()))
    }

    /// Run the configured info command and capture its stdout
    pub async fn tool_info(&self, key: &InstallKey) -> Result<String> {
        let tool = self.tool(&key.name, &key.version)?;
        let args = tool
            .config()
            .map(|config| config.print_info_cmd.clone())
            .unwrap_or_default();
        if args.is_empty() {
            return Ok(String::new());
        }
        let output = tool.exec_command(args)?.output().await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    // ========== Discovery and cleanup ==========

    /// Scan all roots for installed versions missing from the catalog and
    /// synthesize entries for them, so an installed-but-unconfigured tool
    /// still shows up in listings. Rate-limited unless `force`.
    pub fn scan_installed(&self, force: bool) {
        {
            let mut last = self.inner.last_scan.lock().expect("scan stamp poisoned");
            if !force
                && last
                    .map(|stamp| stamp.elapsed() < SCAN_INTERVAL)
                    .unwrap_or(false)
            {
                return;
            }
            *last = Some(Instant::now());
        }

        let mut discovered: Vec<(String, String, crate::meta::ToolMetadata)> = Vec::new();
        for root in self.inner.roots.candidate_roots() {
            let platform_dir = self.inner.roots.platform_dir(root);
            let Ok(tool_dirs) = std::fs::read_dir(&platform_dir) else {
                continue;
            };
            for tool_dir in tool_dirs.flatten() {
                let name = tool_dir.file_name().to_string_lossy().into_owned();
                if name == tooldock_paths::GROUPS_DIR || name.starts_with('.') {
                    continue;
                }
                let Ok(entries) = std::fs::read_dir(tool_dir.path()) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let file_name = entry.file_name().to_string_lossy().into_owned();
                    let Some(version) =
                        file_name.strip_suffix(tooldock_paths::METADATA_SUFFIX)
                    else {
                        continue;
                    };
                    let Ok(data) = std::fs::read(entry.path()) else {
                        continue;
                    };
                    let Ok(metadata) = serde_json::from_slice::<crate::meta::ToolMetadata>(&data)
                    else {
                        continue;
                    };
                    // Only versions whose recorded entry still exists count
                    let entry_rel = if metadata.path_to_entry.is_empty() {
                        name.clone()
                    } else {
                        metadata.path_to_entry.clone()
                    };
                    let entry_abs = self
                        .inner
                        .roots
                        .version_folder(root, &name, version)
                        .join(&entry_rel);
                    if entry_abs.is_file() {
                        discovered.push((name.clone(), version.to_string(), metadata));
                    }
                }
            }
        }

        if discovered.is_empty() {
            return;
        }
        let mut catalog = self.inner.catalog.write().expect("catalog poisoned");
        for (name, version, metadata) in discovered {
            if catalog.contains(&name, &version) {
                continue;
            }
            tracing::info!(tool = %name, %version, "discovered installed version outside catalog");
            let entry_rel = if metadata.path_to_entry.is_empty() {
                name.clone()
            } else {
                metadata.path_to_entry
            };
            catalog.insert(
                &name,
                &version,
                VersionEntry {
                    download_url: OsArchValue::Many(metadata.download_url),
                    path_to_entry: Some(OsArchValue::One(entry_rel)),
                    print_info_cmd: Some(StringOrList::Many(metadata.print_info_cmd)),
                    is_executable: true,
                },
            );
        }
    }

    /// Remove versions (current platform only) whose key is not in the
    /// catalog; foreign os/arch subtrees are removed wholesale
    pub fn delete_unknown(&self) -> Result<()> {
        let snapshot = self.catalog_snapshot();
        cleanup::sweep_versions(&self.inner.roots, &self.inner.locks, |name, version| {
            snapshot.contains(name, version)
        })
    }

    /// Allow-list variant of [`Engine::delete_unknown`]
    pub fn delete_all_except(&self, keep: &[InstallKey]) -> Result<()> {
        cleanup::sweep_versions(&self.inner.roots, &self.inner.locks, |name, version| {
            keep.iter()
                .any(|key| key.name == name && key.version == version)
        })
    }

    /// A point-in-time copy of the catalog (configured plus discovered)
    pub fn catalog_snapshot(&self) -> Catalog {
        self.inner.catalog.read().expect("catalog poisoned").clone()
    }

    // ========== Internals ==========

    pub(crate) fn pause_flag(&self, key: &InstallKey) -> Arc<AtomicBool> {
        self.inner
            .pauses
            .lock()
            .expect("pause registry poisoned")
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    async fn emit(&self, key: &InstallKey, progress: DownloadProgress, sink: &dyn ProgressSink) {
        if let Err(error) = self.inner.meta.record_progress(key, &progress) {
            tracing::warn!(key = %key, %error, "failed to persist state transition");
        }
        sink.emit(progress.message(key)).await;
    }
}

fn completed_event() -> DownloadProgress {
    DownloadProgress {
        status: DownloadStatus::Completed,
        ..Default::default()
    }
}

fn failed_event(error: &Error) -> DownloadProgress {
    DownloadProgress {
        status: DownloadStatus::Failed,
        error: Some(error.to_string()),
        ..Default::default()
    }
}

/// Recursively copy a version tree, skipping symlinks
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|error| {
            Error::Io(std::io::Error::other(format!("walk {}: {}", source.display(), error)))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is under source");
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
