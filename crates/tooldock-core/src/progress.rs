//! Progress events and the sink interface they flow through
//!
//! The download engine produces [`DownloadProgress`] transitions; the
//! lifecycle layer stamps them with the tool identity and forwards the
//! resulting [`ProgressMessage`] to whatever [`ProgressSink`] the caller
//! provided (an SSE broker, a test collector, a no-op).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical identifier for one tool version: `"<name>@<version>"`
///
/// Used as key for the active-task registry, the per-folder lock registry
/// and the cached tool handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstallKey {
    pub name: String,
    pub version: String,
}

impl InstallKey {
    /// Create a key from a tool name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a `"<name>@<version>"` string; returns None when the separator
    /// is missing or either side is empty
    pub fn parse(s: &str) -> Option<Self> {
        let (name, version) = s.split_once('@')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(name, version))
    }
}

impl fmt::Display for InstallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Lifecycle states of a download, as seen by subscribers and by the
/// persisted sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Zero value: no download in flight (serialized as the empty string so
    /// a cleared sidecar round-trips)
    #[default]
    #[serde(rename = "")]
    Idle,
    /// A mirror is about to be attempted
    Trying,
    /// Bytes are flowing
    Downloading,
    /// Archive is being unpacked into staging
    Extracting,
    /// Cooperative pause observed by the read loop
    Paused,
    /// All mirrors exhausted, or a non-retryable error
    Failed,
    /// Artifact present and executable (when required)
    Completed,
    /// Tool group was disabled
    Disabled,
    /// Version was removed
    Uninstalled,
}

impl DownloadStatus {
    /// Statuses that must always be flushed to the sidecar, even when the
    /// record looks unchanged, so a restart observes the last transition
    pub fn force_persists(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Trying
                | DownloadStatus::Extracting
                | DownloadStatus::Paused
                | DownloadStatus::Failed
                | DownloadStatus::Disabled
        )
    }
}

/// One in-memory progress transition emitted by the download engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    /// Server-reported size; 0 when the server did not send Content-Length
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Instantaneous speed over the last emission interval
    pub speed_bytes_per_sec: u64,
    /// 1-indexed mirror attempt
    pub attempt_index: u32,
    pub total_attempts: u32,
    pub current_url: String,
    pub failed_urls: Vec<String>,
    pub all_urls: Vec<String>,
    pub error: Option<String>,
}

impl DownloadProgress {
    /// Stamp this transition with a tool identity, producing the wire payload
    pub fn message(&self, key: &InstallKey) -> ProgressMessage {
        ProgressMessage {
            tool_name: key.name.clone(),
            version: key.version.clone(),
            status: self.status,
            total_bytes: Some(self.total_bytes),
            downloaded_bytes: Some(self.downloaded_bytes),
            speed: Some(self.speed_bytes_per_sec),
            error: self.error.clone(),
            attempt_index: Some(self.attempt_index),
            total_attempts: Some(self.total_attempts),
            current_url: Some(self.current_url.clone()),
            failed_urls: Some(self.failed_urls.clone()),
            all_urls: Some(self.all_urls.clone()),
        }
    }
}

/// Progress payload as delivered to SSE subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub tool_name: String,
    pub version: String,
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_urls: Option<Vec<String>>,
}

impl ProgressMessage {
    /// A bare status message carrying no byte counts (used for
    /// `uninstalled` and `disabled` broadcasts)
    pub fn status_only(key: &InstallKey, status: DownloadStatus) -> Self {
        Self {
            tool_name: key.name.clone(),
            version: key.version.clone(),
            status,
            total_bytes: None,
            downloaded_bytes: None,
            speed: None,
            error: None,
            attempt_index: None,
            total_attempts: None,
            current_url: None,
            failed_urls: None,
            all_urls: None,
        }
    }
}

/// Consumer of progress messages
///
/// Implementations must be cheap and non-blocking: the download read loop
/// awaits each emission before touching the socket again.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    /// Deliver one progress message
    async fn emit(&self, message: ProgressMessage);
}

/// Sink that discards everything
pub struct NoOpSink;

#[async_trait::async_trait]
impl ProgressSink for NoOpSink {
    async fn emit(&self, _message: ProgressMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_install_key_display_and_parse() {
        let key = InstallKey::new("dotnet", "8.0.5");
        assert_eq!(key.to_string(), "dotnet@8.0.5");
        assert_eq!(InstallKey::parse("dotnet@8.0.5"), Some(key));
        assert_eq!(InstallKey::parse("dotnet"), None);
        assert_eq!(InstallKey::parse("@8.0.5"), None);
        assert_eq!(InstallKey::parse("dotnet@"), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DownloadStatus::Downloading).unwrap(),
            "\"downloading\""
        );
        assert_eq!(
            serde_json::to_string(&DownloadStatus::Idle).unwrap(),
            "\"\""
        );
        let status: DownloadStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, DownloadStatus::Paused);
    }

    #[test]
    fn test_message_wire_field_names() {
        let key = InstallKey::new("ffmpeg", "7.0");
        let progress = DownloadProgress {
            status: DownloadStatus::Downloading,
            total_bytes: 100,
            downloaded_bytes: 42,
            speed_bytes_per_sec: 7,
            attempt_index: 1,
            total_attempts: 2,
            current_url: "https://example.com/a.zip".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(progress.message(&key)).unwrap();
        assert_eq!(json["toolName"], "ffmpeg");
        assert_eq!(json["version"], "7.0");
        assert_eq!(json["status"], "downloading");
        assert_eq!(json["totalBytes"], 100);
        assert_eq!(json["downloadedBytes"], 42);
        assert_eq!(json["speed"], 7);
        assert_eq!(json["attemptIndex"], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_status_only_message_skips_counts() {
        let key = InstallKey::new("jq", "1.7");
        let json =
            serde_json::to_value(ProgressMessage::status_only(&key, DownloadStatus::Uninstalled))
                .unwrap();
        assert_eq!(json["status"], "uninstalled");
        assert!(json.get("totalBytes").is_none());
        assert!(json.get("downloadedBytes").is_none());
    }
}
