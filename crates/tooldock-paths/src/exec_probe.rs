//! Exec-permission probing for `noexec` mount-points
//!
//! Container volumes are frequently mounted `noexec`; a file's 0755 mode
//! says nothing about whether the kernel will actually run it. The only
//! reliable signal is to write a tiny script into the directory and execute
//! it. Results are cached per directory with a TTL because the probe costs a
//! write, an exec and an unlink.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[cfg(unix)]
const PROBE_FILE: &str = ".tooldock_exec_probe.sh";
#[cfg(unix)]
const PROBE_TOKEN: &str = "tooldock-exec-ok";

/// Cached exec-permission prober
pub struct ExecProber {
    cache: Mutex<HashMap<PathBuf, (bool, Instant)>>,
    ttl: Duration,
}

impl ExecProber {
    /// Create a prober with the default 10 minute TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a prober with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Check whether files under `dir` can be executed
    ///
    /// Creates `dir` when missing. Returns false on any write or exec
    /// failure. Always returns true on non-Unix platforms.
    pub fn exec_supported(&self, dir: &Path) -> bool {
        let key = cache_key(dir);
        if let Ok(cache) = self.cache.lock()
            && let Some((supported, stamp)) = cache.get(&key)
            && stamp.elapsed() < self.ttl
        {
            return *supported;
        }

        let supported = probe(dir);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, (supported, Instant::now()));
        }
        supported
    }

    /// Drop the cached result for `dir` (after relocating a tree, the copy's
    /// directory must be probed fresh)
    pub fn invalidate(&self, dir: &Path) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&cache_key(dir));
        }
    }
}

impl Default for ExecProber {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

#[cfg(unix)]
fn probe(dir: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let script = dir.join(PROBE_FILE);
    let body = format!("#!/bin/sh\necho {}\n", PROBE_TOKEN);
    if std::fs::write(&script, body).is_err() {
        let _ = std::fs::remove_file(&script);
        return false;
    }
    if std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).is_err() {
        let _ = std::fs::remove_file(&script);
        return false;
    }

    let supported = match std::process::Command::new(&script).output() {
        Ok(output) => {
            output.status.success()
                && String::from_utf8_lossy(&output.stdout).trim() == PROBE_TOKEN
        }
        Err(error) => {
            tracing::debug!(dir = %dir.display(), %error, "exec probe failed");
            false
        }
    };

    let _ = std::fs::remove_file(&script);
    supported
}

#[cfg(not(unix))]
fn probe(_dir: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let prober = ExecProber::new();
        // A regular tempdir is exec-capable on every CI platform we build on
        assert!(prober.exec_supported(dir.path()));
        // Probe file must be cleaned up
        assert!(!dir.path().join(".tooldock_exec_probe.sh").exists());
    }

    #[test]
    fn test_probe_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        let prober = ExecProber::new();
        assert!(prober.exec_supported(&nested));
        assert!(nested.is_dir());
    }

    #[test]
    fn test_cache_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let prober = ExecProber::with_ttl(Duration::from_secs(3600));
        assert!(prober.exec_supported(dir.path()));
        // Cached: a second call must not recreate the probe file
        assert!(prober.exec_supported(dir.path()));
        prober.invalidate(dir.path());
        assert!(prober.exec_supported(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_dir_is_unsupported() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        let prober = ExecProber::new();
        // Running as root would still be able to write; skip the assertion there
        if std::fs::write(locked.join("x"), b"x").is_err() {
            assert!(!prober.exec_supported(&locked));
        }
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
