//! # tooldock-core
//!
//! Catalog model, version selection and the shared progress/event types for
//! the tooldock tool-acquisition engine.
//!
//! This crate is deliberately free of I/O beyond reading the catalog file:
//! the download pipeline, the on-disk stores and the HTTP surface live in
//! their own crates and all speak the types defined here.

pub mod catalog;
pub mod error;
pub mod progress;
pub mod version;

pub use catalog::{Catalog, OsArchValue, StringOrList, ToolConfig, VersionEntry};
pub use error::{Error, Result};
pub use progress::{
    DownloadProgress, DownloadStatus, InstallKey, NoOpSink, ProgressMessage, ProgressSink,
};

/// Version information for the tooldock-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default user agent for HTTP requests issued on behalf of the engine
pub const USER_AGENT: &str = concat!("tooldock/", env!("CARGO_PKG_VERSION"));
