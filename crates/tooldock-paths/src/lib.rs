//! Cross-platform storage layout and resolution for tooldock installations
//!
//! This crate owns the on-disk shape of a tool store:
//!
//! ```text
//! <root>/<os>/<arch>/<tool>/<version>/...          version folder
//! <root>/<os>/<arch>/<tool>/<version>.toolmeta.json  per-version sidecar
//! <root>/<os>/<arch>/_groups/<tool>.json           per-name group sidecar
//! <root>/<os>/<arch>/<tool>/.tmp_<version>         extraction staging
//! <root>/<os>/<arch>/<tool>/.trash-<version>-<id>  uninstall trash
//! ```
//!
//! plus the ordered-root resolution rule (read-only roots first, writable
//! root last) and the `noexec` mount-point probe.

pub mod exec_probe;
pub mod platform;
pub mod roots;

pub use exec_probe::ExecProber;
pub use platform::Platform;
pub use roots::{Located, Roots};

/// Prefix of extraction staging folders
pub const STAGING_PREFIX: &str = ".tmp_";

/// Prefix of uninstall trash folders
pub const TRASH_PREFIX: &str = ".trash-";

/// Suffix of per-version metadata sidecars
pub const METADATA_SUFFIX: &str = ".toolmeta.json";

/// Directory holding per-name group sidecars
pub const GROUPS_DIR: &str = "_groups";
