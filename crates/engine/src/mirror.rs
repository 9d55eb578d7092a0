//! Target-side mirror entry: keyed by `(source_name, relative_path)`,
//! tracking local size and in-flight stream state.

use std::collections::HashMap;

/// Where a path's catch-up transfer currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotRequested,
    Requested,
    InProgress,
    Complete,
    Fail,
}

/// One tracked path under a source's mirror subdirectory.
#[derive(Debug, Clone)]
pub struct MirrorEntry {
    pub size: u64,
    pub stream_state: StreamState,
    /// Advisory digest, compared against the server's `c` field; never
    /// computed locally (the mirror trusts the server's digest rather than
    /// rehashing its own files).
    pub hash_hex: Option<String>,
}

impl MirrorEntry {
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            size,
            stream_state: StreamState::NotRequested,
            hash_hex: None,
        }
    }
}

/// A source's full mirror: every tracked relative path beneath
/// `<working_dir>/<source_name>/`.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    entries: HashMap<String, MirrorEntry>,
}

impl Mirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&MirrorEntry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut MirrorEntry> {
        self.entries.get_mut(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: MirrorEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<MirrorEntry> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MirrorEntry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut MirrorEntry)> {
        self.entries.iter_mut()
    }

    /// Paths with no explicit entry in `present` get deleted. Used only on a
    /// full list response, never on a partial delta, so a delta can never
    /// imply a deletion it didn't explicitly tombstone.
    pub fn prune_to(&mut self, present: &std::collections::HashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|p| !present.contains(p.as_str()))
            .cloned()
            .collect();
        for path in &stale {
            self.entries.remove(path);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_to_removes_paths_absent_from_a_full_list() {
        let mut mirror = Mirror::new();
        mirror.insert("a.log", MirrorEntry::new(10));
        mirror.insert("b.log", MirrorEntry::new(20));
        let present = std::collections::HashSet::from(["a.log".to_string()]);
        let removed = mirror.prune_to(&present);
        assert_eq!(removed, vec!["b.log".to_string()]);
        assert!(mirror.contains("a.log"));
        assert!(!mirror.contains("b.log"));
    }
}
