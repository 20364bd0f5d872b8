//! Descriptor table.
//!
//! # Responsibilities
//! - Map each pipe path to at most one live descriptor
//! - Release a descriptor (and its open handle) before its file is replaced
//! - Track last use and drop idle per-friend descriptors
//!
//! Entries are removed from the map first and dropped afterwards, so no
//! shard lock is held while a handle is closed.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::fifo::descriptor::{Direction, FifoDescriptor};

/// Concurrent path → descriptor map.
#[derive(Debug, Default)]
pub struct FifoTable {
    entries: DashMap<PathBuf, FifoDescriptor>,
}

impl FifoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor`, replacing (and closing) any previous one.
    pub fn register(&self, descriptor: FifoDescriptor) {
        let previous = self.entries.insert(descriptor.path.clone(), descriptor);
        drop(previous);
    }

    /// Register `descriptor` only when the path has no live entry.
    ///
    /// Returns false (and drops `descriptor`) when one already exists.
    pub fn register_if_absent(&self, descriptor: FifoDescriptor) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(descriptor.path.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
        }
    }

    /// Remove and return the descriptor for `path`.
    pub fn release(&self, path: &Path) -> Option<FifoDescriptor> {
        self.entries.remove(path).map(|(_, descriptor)| descriptor)
    }

    /// Snapshot of the descriptor for `path`.
    pub fn get(&self, path: &Path) -> Option<FifoDescriptor> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn direction(&self, path: &Path) -> Option<Direction> {
        self.entries.get(path).map(|entry| entry.direction)
    }

    /// The open read end for an input pipe.
    pub fn input_handle(&self, path: &Path) -> Option<Arc<File>> {
        self.entries.get(path).and_then(|entry| entry.handle())
    }

    /// Mark `path` as used now. Returns false when it is not registered.
    pub fn touch(&self, path: &Path) -> bool {
        match self.entries.get_mut(path) {
            Some(mut entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Drop per-friend descriptors idle for longer than `threshold` at `now`.
    ///
    /// Global descriptors are never dropped. Returns the removed paths.
    pub fn sweep_idle(&self, now: Instant, threshold: Duration) -> Vec<PathBuf> {
        let candidates: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|e| !e.is_global() && e.idle_for(now) > threshold)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for path in candidates {
            // Re-check under the shard lock; a writer may have touched it.
            let evicted = self
                .entries
                .remove_if(&path, |_, d| !d.is_global() && d.idle_for(now) > threshold);
            if let Some((path, descriptor)) = evicted {
                drop(descriptor);
                removed.push(path);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::descriptor::FifoScope;

    fn descriptor(path: &str, scope: FifoScope) -> FifoDescriptor {
        FifoDescriptor::new(PathBuf::from(path), Direction::Output, scope, 0o600, None)
    }

    #[test]
    fn test_register_replaces_entry() {
        let table = FifoTable::new();
        table.register(descriptor("/x/text_out", FifoScope::Friend));
        table.register(descriptor("/x/text_out", FifoScope::Friend));
        assert_eq!(table.len(), 1);

        assert!(!table.register_if_absent(descriptor("/x/text_out", FifoScope::Friend)));
        assert!(table.register_if_absent(descriptor("/x/status", FifoScope::Friend)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_sweep_exempts_global() {
        let table = FifoTable::new();
        table.register(descriptor("/r/client/request_out", FifoScope::Global));
        table.register(descriptor("/r/peer/text_out", FifoScope::Friend));

        let later = Instant::now() + Duration::from_secs(24 * 3600);
        let removed = table.sweep_idle(later, Duration::from_secs(1800));

        assert_eq!(removed, vec![PathBuf::from("/r/peer/text_out")]);
        assert!(table.contains(Path::new("/r/client/request_out")));
        assert!(!table.contains(Path::new("/r/peer/text_out")));
    }

    #[test]
    fn test_sweep_keeps_recently_used() {
        let table = FifoTable::new();
        table.register(descriptor("/r/peer/status", FifoScope::Friend));
        assert!(table.touch(Path::new("/r/peer/status")));

        let removed = table.sweep_idle(Instant::now(), Duration::from_secs(1800));
        assert!(removed.is_empty());
        assert_eq!(table.len(), 1);
        assert!(!table.touch(Path::new("/r/missing")));
    }
}
