//! # tooldock-engine
//!
//! The acquisition and lifecycle core: mirror-failover downloads with
//! resumable transfers and cooperative pause, staged archive extraction,
//! persisted per-version metadata, per-folder mutual exclusion and the
//! install/uninstall/pause orchestration that ties them together.
//!
//! The [`Engine`] is the single entry point; everything it needs (roots,
//! catalog, rate limit, progress sink) is injected at construction so tests
//! can run many isolated engines in one process.

pub mod active;
pub mod cleanup;
pub mod download;
pub mod error;
pub mod extract;
pub mod filename;
pub mod limiter;
pub mod locks;
pub mod manager;
pub mod meta;
pub mod tool;

pub use active::ActiveTasks;
pub use download::DownloadEngine;
pub use error::{Error, Result};
pub use limiter::{parse_limit, RateLimiter};
pub use locks::FolderLocks;
pub use manager::{
    Engine, EngineConfig, InstallReservation, ToolListing, VersionListing, VersionStatus,
};
pub use meta::{DownloadProcess, GroupStore, MetadataStore, ToolGroupMetadata, ToolMetadata};
pub use tool::{dev_env_var, DevTool, RemoteTool, Tool};

/// Version information for the tooldock-engine crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
