//! Per-collection mutual exclusion for sync runs
//!
//! A sync's "list existing, decide, apply" sequence must not interleave with
//! another sync of the same collection and key space.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

/// Registry of collections currently being synced
///
/// Shared explicitly between syncers (never a process global).
#[derive(Default)]
pub struct CollectionLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Exclusive hold on one collection, released on drop
pub struct CollectionGuard<'a> {
    locks: &'a CollectionLocks,
    key: String,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it
    pub fn acquire(&self, key: &str) -> CollectionGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(key) {
            log::debug!("Waiting for sync lock on {}", key);
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.to_string());
        CollectionGuard {
            locks: self,
            key: key.to_string(),
        }
    }

    /// Hold `key` if nobody else does
    pub fn try_acquire(&self, key: &str) -> Option<CollectionGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(CollectionGuard {
            locks: self,
            key: key.to_string(),
        })
    }

    /// Whether `key` is currently held
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

impl CollectionGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CollectionGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        self.locks.released.notify_all();
    }
}
