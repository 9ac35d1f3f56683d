//! Tool handles: the downloaded kind and the dev override
//!
//! A [`Tool`] is the caller-facing capability set over one `tool@version`.
//! The remote variant drives the full lifecycle through the engine; the dev
//! variant points at a local binary named by a `DEV_<TOOLNAME>` environment
//! variable and bypasses download entirely (its version is always `"dev"`).

use crate::manager::Engine;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tooldock_core::{InstallKey, ProgressSink, ToolConfig};

/// A handle on one tool version
pub enum Tool {
    /// Acquired from the catalog's mirrors into a storage root
    Remote(RemoteTool),
    /// Local development override
    Dev(DevTool),
}

impl Tool {
    /// Tool name
    pub fn name(&self) -> &str {
        match self {
            Tool::Remote(tool) => &tool.config.name,
            Tool::Dev(tool) => &tool.name,
        }
    }

    /// Version string (`"dev"` for the override)
    pub fn version(&self) -> &str {
        match self {
            Tool::Remote(tool) => &tool.config.version,
            Tool::Dev(_) => "dev",
        }
    }

    /// Canonical `name@version` key
    pub fn key(&self) -> InstallKey {
        InstallKey::new(self.name(), self.version())
    }

    /// True when the entry file is present on disk
    pub fn exists(&self) -> bool {
        match self {
            Tool::Remote(tool) => tool.locate().is_some(),
            Tool::Dev(tool) => tool.path.is_file(),
        }
    }

    /// True when the resolved home is one of the read-only roots
    pub fn is_from_read_only_root(&self) -> bool {
        match self {
            Tool::Remote(tool) => tool.locate().map(|located| located.read_only).unwrap_or(false),
            Tool::Dev(_) => false,
        }
    }

    /// The folder the artifact lives in
    pub fn storage_folder(&self) -> PathBuf {
        match self {
            Tool::Remote(tool) => tool
                .locate()
                .map(|located| located.folder)
                .unwrap_or_else(|| tool.writable_folder()),
            Tool::Dev(tool) => tool.folder(),
        }
    }

    /// Absolute path of the entry file in storage
    pub fn entry_path(&self) -> PathBuf {
        match self {
            Tool::Remote(tool) => tool
                .locate()
                .map(|located| located.entry)
                .unwrap_or_else(|| tool.writable_folder().join(&tool.config.path_to_entry)),
            Tool::Dev(tool) => tool.path.clone(),
        }
    }

    /// The folder the tool is launched from: the exec-root copy when one
    /// was staged, the storage folder otherwise
    pub fn exec_folder(&self) -> PathBuf {
        match self {
            Tool::Remote(tool) => {
                if let Some(folder) = tool.exec_copy_folder()
                    && folder.join(&tool.config.path_to_entry).is_file()
                {
                    folder
                } else {
                    self.storage_folder()
                }
            }
            Tool::Dev(tool) => tool.folder(),
        }
    }

    /// Absolute path of the entry file to execute
    pub fn exec_path(&self) -> PathBuf {
        match self {
            Tool::Remote(tool) => tool
                .exec_copy_entry()
                .unwrap_or_else(|| self.entry_path()),
            Tool::Dev(tool) => tool.path.clone(),
        }
    }

    /// Build a command that launches the tool with the given arguments
    pub fn exec_command<I, S>(&self, args: I) -> Result<tokio::process::Command>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        if !self.exists() {
            return Err(Error::NotInstalled {
                key: self.key().to_string(),
            });
        }
        let mut command = tokio::process::Command::new(self.exec_path());
        command.args(args);
        Ok(command)
    }

    /// Install this version, streaming progress to `sink`
    ///
    /// No-op success for the dev variant.
    pub async fn install(&self, sink: Arc<dyn ProgressSink>) -> Result<()> {
        match self {
            Tool::Remote(tool) => tool.engine.install_with_sink(&tool.config.key(), sink).await,
            Tool::Dev(_) => Ok(()),
        }
    }

    /// Remove this version from the writable root. No-op for the dev
    /// variant.
    pub async fn uninstall(&self) -> Result<()> {
        match self {
            Tool::Remote(tool) => tool.engine.uninstall(&tool.config.key()).await,
            Tool::Dev(_) => Ok(()),
        }
    }

    /// Flag the in-flight download to pause at its next read
    pub fn pause(&self) {
        if let Tool::Remote(tool) = self {
            tool.engine.pause(&tool.config.key());
        }
    }

    /// The per-platform configuration, when this is a remote tool
    pub fn config(&self) -> Option<&ToolConfig> {
        match self {
            Tool::Remote(tool) => Some(&tool.config),
            Tool::Dev(_) => None,
        }
    }
}

/// Catalog-backed tool bound to an engine
pub struct RemoteTool {
    pub(crate) engine: Engine,
    pub(crate) config: ToolConfig,
}

impl RemoteTool {
    fn locate(&self) -> Option<tooldock_paths::Located> {
        self.engine.roots().resolve(
            &self.config.name,
            &self.config.version,
            &self.config.path_to_entry,
        )
    }

    fn writable_folder(&self) -> PathBuf {
        self.engine
            .roots()
            .writable_folder(&self.config.name, &self.config.version)
    }

    fn exec_copy_folder(&self) -> Option<PathBuf> {
        self.engine
            .roots()
            .exec_folder(&self.config.name, &self.config.version)
    }

    /// Entry inside the exec-root copy, when the copy exists
    fn exec_copy_entry(&self) -> Option<PathBuf> {
        let entry = self
            .exec_copy_folder()?
            .join(&self.config.path_to_entry);
        entry.is_file().then_some(entry)
    }
}

/// Local-path override configured through the environment
pub struct DevTool {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
}

impl DevTool {
    /// Create an override pointing at a local binary
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    fn folder(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Environment variable naming the dev override for a tool
///
/// `dotnet-sdk` → `DEV_DOTNET_SDK`
pub fn dev_env_var(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("DEV_{}", upper)
}
