//! Registry of installs currently in flight
//!
//! Source of truth for the duplicate-install guard (`409 Conflict`) and for
//! the front-end's "do I need an SSE connection" probe. Mirrors in-memory
//! state from every install source, HTTP or programmatic.

use std::collections::HashSet;
use std::sync::RwLock;
use tooldock_core::InstallKey;

/// Set of `tool@version` keys with an active install
#[derive(Default)]
pub struct ActiveTasks {
    inner: RwLock<HashSet<InstallKey>>,
}

impl ActiveTasks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key active; returns false when it already was
    pub fn insert(&self, key: &InstallKey) -> bool {
        self.inner
            .write()
            .expect("active registry poisoned")
            .insert(key.clone())
    }

    /// Unmark a key
    pub fn remove(&self, key: &InstallKey) {
        self.inner
            .write()
            .expect("active registry poisoned")
            .remove(key);
    }

    /// True when the key has an install in flight
    pub fn contains(&self, key: &InstallKey) -> bool {
        self.inner
            .read()
            .expect("active registry poisoned")
            .contains(key)
    }

    /// Snapshot of the active keys, sorted for stable output
    pub fn list(&self) -> Vec<InstallKey> {
        let mut keys: Vec<_> = self
            .inner
            .read()
            .expect("active registry poisoned")
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// True when any install is in flight
    pub fn any(&self) -> bool {
        !self
            .inner
            .read()
            .expect("active registry poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_roundtrip() {
        let active = ActiveTasks::new();
        let key = InstallKey::new("dotnet", "8.0.5");

        assert!(!active.any());
        assert!(active.insert(&key));
        assert!(!active.insert(&key));
        assert!(active.contains(&key));
        assert!(active.any());

        active.remove(&key);
        assert!(!active.contains(&key));
        assert!(active.list().is_empty());
    }

    #[test]
    fn test_list_is_sorted() {
        let active = ActiveTasks::new();
        active.insert(&InstallKey::new("zig", "0.13"));
        active.insert(&InstallKey::new("dotnet", "8.0.5"));
        let names: Vec<String> = active.list().iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["dotnet@8.0.5", "zig@0.13"]);
    }
}
