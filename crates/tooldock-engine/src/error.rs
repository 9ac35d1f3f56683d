//! Error types for tooldock-engine

use std::path::PathBuf;

/// Result type alias for tooldock-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during download and lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Catalog/resolution error
    #[error(transparent)]
    Core(#[from] tooldock_core::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another operation currently holds the per-tool lock
    #[error("{key} is busy with another operation")]
    Busy { key: String },

    /// Sentinel: the cooperative pause flag was observed by the read loop.
    /// Not a failure at the lifecycle boundary.
    #[error("download paused")]
    Paused,

    /// One mirror failed (recorded and the loop moves on), or all of them did
    #[error("download failed from {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Archive extraction failed; staging has been removed
    #[error("failed to extract {archive}: {reason}")]
    ExtractionFailed { archive: PathBuf, reason: String },

    /// The storage folder is on a `noexec` mount and no usable exec root
    /// is available
    #[error("executables are not supported under {dir}")]
    ExecUnsupported { dir: PathBuf },

    /// The tool version is not installed
    #[error("{key} is not installed")]
    NotInstalled { key: String },
}

impl Error {
    /// Create a download failed error
    pub fn download_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an extraction failed error
    pub fn extraction_failed(archive: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            archive: archive.into(),
            reason: reason.into(),
        }
    }

    /// Create a busy error
    pub fn busy(key: impl Into<String>) -> Self {
        Self::Busy { key: key.into() }
    }

    /// True when the per-tool lock was contended
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }

    /// True for the cooperative-pause sentinel
    pub fn is_paused(&self) -> bool {
        matches!(self, Error::Paused)
    }

    /// True when the failure should map to a client-side HTTP status
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Core(inner) => inner.is_not_found(),
            Error::NotInstalled { .. } => true,
            _ => false,
        }
    }
}
