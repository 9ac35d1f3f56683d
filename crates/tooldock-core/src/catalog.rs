//! Catalog model: the declarative description of downloadable tools
//!
//! The catalog is a JSON document of the shape
//! `{toolName: {version: VersionEntry}}`. Per-platform values accept three
//! shapes (bare string, string array, nested os/arch map) and collapse into
//! an ordered list for the current platform; an empty list means "no value
//! for this platform" and consumers must treat the entry as absent.

use crate::progress::InstallKey;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A value that may differ per operating system and architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OsArchValue {
    /// Same value everywhere
    One(String),
    /// Same ordered list everywhere
    Many(Vec<String>),
    /// Keyed by os, optionally by arch below that
    PerOs(BTreeMap<String, OsLeaf>),
}

/// Value under an os key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OsLeaf {
    One(String),
    Many(Vec<String>),
    PerArch(BTreeMap<String, ArchLeaf>),
}

/// Value under an arch key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArchLeaf {
    One(String),
    Many(Vec<String>),
}

impl OsArchValue {
    /// Collapse to the ordered value list for (os, arch)
    ///
    /// Unknown os or arch keys yield an empty list.
    pub fn resolve(&self, os: &str, arch: &str) -> Vec<String> {
        match self {
            OsArchValue::One(value) => vec![value.clone()],
            OsArchValue::Many(values) => values.clone(),
            OsArchValue::PerOs(by_os) => match by_os.get(os) {
                Some(OsLeaf::One(value)) => vec![value.clone()],
                Some(OsLeaf::Many(values)) => values.clone(),
                Some(OsLeaf::PerArch(by_arch)) => match by_arch.get(arch) {
                    Some(ArchLeaf::One(value)) => vec![value.clone()],
                    Some(ArchLeaf::Many(values)) => values.clone(),
                    None => Vec::new(),
                },
                None => Vec::new(),
            },
        }
    }
}

/// A string or a list of strings (accepted for `printInfoCmd`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// Flatten into an argument vector
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrList::One(value) => vec![value.clone()],
            StringOrList::Many(values) => values.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One catalog entry for a specific tool version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    /// Candidate download URLs, tried in order
    pub download_url: OsArchValue,
    /// Relative path of the entry file inside the version folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_to_entry: Option<OsArchValue>,
    /// Argument vector appended to the entry file to print tool info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_info_cmd: Option<StringOrList>,
    /// False marks non-executable payloads such as support libraries
    #[serde(default = "default_true")]
    pub is_executable: bool,
}

/// Resolved per-platform configuration for one `tool@version`
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub name: String,
    pub version: String,
    /// Ordered mirror list for the current platform; never empty
    pub download_urls: Vec<String>,
    /// Relative entry path inside the version folder
    pub path_to_entry: String,
    pub print_info_cmd: Vec<String>,
    pub is_executable: bool,
}

impl ToolConfig {
    /// The canonical `name@version` key
    pub fn key(&self) -> InstallKey {
        InstallKey::new(&self.name, &self.version)
    }
}

/// The full tool catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    tools: BTreeMap<String, BTreeMap<String, VersionEntry>>,
}

impl Catalog {
    /// Load a catalog from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Parse a catalog from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// All tool names, in stable order
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// All versions declared for a tool
    pub fn versions(&self, name: &str) -> Vec<&str> {
        self.tools
            .get(name)
            .map(|versions| versions.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Look up a raw entry
    pub fn entry(&self, name: &str, version: &str) -> Option<&VersionEntry> {
        self.tools.get(name)?.get(version)
    }

    /// True when `name@version` is declared
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.entry(name, version).is_some()
    }

    /// Insert or replace an entry (used by runtime discovery of installed
    /// tools that are no longer in the configured catalog)
    pub fn insert(&mut self, name: impl Into<String>, version: impl Into<String>, entry: VersionEntry) {
        self.tools
            .entry(name.into())
            .or_default()
            .insert(version.into(), entry);
    }

    /// Resolve the per-platform configuration for one `tool@version`
    ///
    /// Fails when the tool or version is unknown, or when the entry has no
    /// download URL for (os, arch).
    pub fn tool_config(&self, name: &str, version: &str, os: &str, arch: &str) -> Result<ToolConfig> {
        let versions = self
            .tools
            .get(name)
            .ok_or_else(|| Error::tool_not_found(name))?;
        let entry = versions
            .get(version)
            .ok_or_else(|| Error::version_not_found(name, version))?;
        let download_urls = entry.download_url.resolve(os, arch);
        if download_urls.is_empty() {
            return Err(Error::no_url_for_platform(
                name,
                version,
                format!("{}/{}", os, arch),
            ));
        }
        Ok(ToolConfig {
            name: name.to_string(),
            version: version.to_string(),
            download_urls,
            path_to_entry: resolve_entry_path(name, entry, os, arch),
            print_info_cmd: entry
                .print_info_cmd
                .as_ref()
                .map(StringOrList::to_vec)
                .unwrap_or_default(),
            is_executable: entry.is_executable,
        })
    }

    /// Resolve every entry for (os, arch), dropping the ones with no URL for
    /// this platform
    pub fn tool_configs(&self, os: &str, arch: &str) -> Vec<ToolConfig> {
        let mut configs = Vec::new();
        for (name, versions) in &self.tools {
            for version in versions.keys() {
                match self.tool_config(name, version, os, arch) {
                    Ok(config) => configs.push(config),
                    Err(Error::NoUrlForPlatform { .. }) => {
                        tracing::warn!(
                            tool = %name,
                            version = %version,
                            "catalog entry has no download URL for {}/{}, skipping",
                            os,
                            arch
                        );
                    }
                    Err(_) => unreachable!("iterating existing entries"),
                }
            }
        }
        configs
    }
}

fn resolve_entry_path(name: &str, entry: &VersionEntry, os: &str, arch: &str) -> String {
    entry
        .path_to_entry
        .as_ref()
        .map(|value| value.resolve(os, arch))
        .and_then(|paths| paths.into_iter().next())
        // No entry path for this platform: assume the artifact is a bare
        // file named after the tool
        .unwrap_or_else(|| name.to_string())
}
