//! Per-folder mutual exclusion
//!
//! Every operation that mutates a version folder (install, uninstall, the
//! cleanup sweep) must hold the folder's lock. Acquisition is non-blocking:
//! a contended caller gets [`Error::Busy`](crate::Error::Busy) semantics
//! (`None` here) instead of queueing behind a download that may run for
//! minutes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Registry of folder-keyed mutexes
///
/// Entries accumulate over the process lifetime but are just an `Arc` and a
/// mutex each.
#[derive(Default)]
pub struct FolderLocks {
    inner: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FolderLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock for `folder` without blocking
    ///
    /// Returns `None` when another operation currently holds it. The guard
    /// releases on drop.
    pub fn try_acquire(&self, folder: &Path) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.inner.lock().expect("folder lock registry poisoned");
            map.entry(folder.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }

    /// True when the folder's lock is currently held
    pub fn is_locked(&self, folder: &Path) -> bool {
        let lock = {
            let map = self.inner.lock().expect("folder lock registry poisoned");
            match map.get(folder) {
                Some(lock) => lock.clone(),
                None => return false,
            }
        };
        lock.try_lock().is_err()
    }
}
