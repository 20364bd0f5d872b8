//! Friend registry.
//!
//! # Responsibilities
//! - Map engine handles and public keys to friend records
//! - Keep the handle index and the key index consistent
//! - Hand out owned snapshots only
//!
//! # Design Decisions
//! - One `RwLock` guards both indices, so an upsert is observed all at once
//! - Readers run concurrently, writers are serialized
//! - Nothing borrowed from inside the lock is ever returned

pub mod friend;

pub use friend::{Friend, Presence};

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::{FriendHandle, PublicKey};

#[derive(Debug, Default)]
struct Indices {
    by_handle: HashMap<FriendHandle, Friend>,
    by_key: HashMap<PublicKey, FriendHandle>,
}

impl Indices {
    fn remove_handle(&mut self, handle: FriendHandle) -> Option<Friend> {
        let friend = self.by_handle.remove(&handle)?;
        if self.by_key.get(&friend.public_key) == Some(&handle) {
            self.by_key.remove(&friend.public_key);
        }
        Some(friend)
    }
}

/// Thread-safe store of known peers.
#[derive(Debug, Default)]
pub struct FriendRegistry {
    inner: RwLock<Indices>,
}

impl FriendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a record, updating both indices together.
    ///
    /// A record previously stored under the same handle with a different key
    /// loses its key entry, and a different handle previously owning this key
    /// is evicted, so neither index can dangle.
    pub fn upsert(&self, friend: Friend) {
        let mut indices = self.write();

        if let Some(previous) = indices.by_key.get(&friend.public_key).copied() {
            if previous != friend.handle {
                indices.remove_handle(previous);
            }
        }
        let stale_key = indices
            .by_handle
            .get(&friend.handle)
            .map(|old| old.public_key)
            .filter(|old_key| *old_key != friend.public_key);
        if let Some(old_key) = stale_key {
            indices.by_key.remove(&old_key);
        }

        indices.by_key.insert(friend.public_key, friend.handle);
        indices.by_handle.insert(friend.handle, friend);
    }

    /// Apply `f` to the record for `handle` and return the updated snapshot.
    ///
    /// The key is treated as immutable; changes to it are discarded.
    pub fn update(&self, handle: FriendHandle, f: impl FnOnce(&mut Friend)) -> Option<Friend> {
        let mut indices = self.write();
        let friend = indices.by_handle.get_mut(&handle)?;
        let key = friend.public_key;
        f(friend);
        friend.public_key = key;
        friend.handle = handle;
        Some(friend.clone())
    }

    pub fn remove(&self, handle: FriendHandle) -> Option<Friend> {
        self.write().remove_handle(handle)
    }

    pub fn by_handle(&self, handle: FriendHandle) -> Option<Friend> {
        self.read().by_handle.get(&handle).cloned()
    }

    pub fn by_key(&self, key: &PublicKey) -> Option<Friend> {
        let indices = self.read();
        let handle = indices.by_key.get(key)?;
        indices.by_handle.get(handle).cloned()
    }

    /// Snapshot of all records, ordered by handle.
    pub fn list(&self) -> Vec<Friend> {
        let mut friends: Vec<Friend> = self.read().by_handle.values().cloned().collect();
        friends.sort_by_key(|f| f.handle);
        friends
    }

    pub fn len(&self) -> usize {
        self.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every handle entry has a matching key entry and back.
    pub fn is_consistent(&self) -> bool {
        let indices = self.read();
        indices.by_handle.len() == indices.by_key.len()
            && indices.by_key.iter().all(|(key, handle)| {
                indices
                    .by_handle
                    .get(handle)
                    .is_some_and(|f| f.public_key == *key)
            })
    }
}
