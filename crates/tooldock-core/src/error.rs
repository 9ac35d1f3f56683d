//! Error types for tooldock-core

/// Result type alias for tooldock-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for catalog loading and tool resolution
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog JSON could not be parsed
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(#[from] serde_json::Error),

    /// Requested tool is not present in the catalog
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// Requested version is not present for the tool
    #[error("Version {version} not found for tool {name}")]
    VersionNotFound { name: String, version: String },

    /// The catalog entry has no download URL for the current platform
    #[error("No download URL for {name} v{version} on {platform}")]
    NoUrlForPlatform {
        name: String,
        version: String,
        platform: String,
    },

    /// No version of the tool is installed
    #[error("No installed version of {name}")]
    NoInstalledVersion { name: String },
}

impl Error {
    /// Create a tool-not-found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a version-not-found error
    pub fn version_not_found(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::VersionNotFound {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Create a no-url-for-platform error
    pub fn no_url_for_platform(
        name: impl Into<String>,
        version: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self::NoUrlForPlatform {
            name: name.into(),
            version: version.into(),
            platform: platform.into(),
        }
    }

    /// Check if this error should surface as a client-side (4xx) failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ToolNotFound { .. }
                | Error::VersionNotFound { .. }
                | Error::NoUrlForPlatform { .. }
                | Error::NoInstalledVersion { .. }
        )
    }
}
