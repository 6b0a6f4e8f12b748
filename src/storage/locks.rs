//! Per-message mutual exclusion.
//!
//! Entries are created on demand and never removed. Multi-message acquisition
//! always happens in ascending id order, which keeps concurrent writers from
//! deadlocking on each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::core::MessageId;

#[derive(Debug, Default)]
struct LockEntry {
    held: Mutex<bool>,
    released: Condvar,
}

impl LockEntry {
    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }

    fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

/// Lock table keyed by message id.
#[derive(Debug, Default)]
pub struct LockManager {
    entries: Mutex<HashMap<MessageId, Arc<LockEntry>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: MessageId) -> Arc<LockEntry> {
        Arc::clone(self.entries.lock().entry(id).or_default())
    }

    /// Lock a single message.
    pub fn lock(&self, id: MessageId) -> MessageLocks {
        self.lock_all([id])
    }

    /// Lock every id in ascending order, duplicates collapsed.
    pub fn lock_all(&self, ids: impl IntoIterator<Item = MessageId>) -> MessageLocks {
        let mut ids: Vec<MessageId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut held = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = self.entry(id);
            entry.acquire();
            held.push((id, entry));
        }
        trace!(count = held.len(), "message locks acquired");
        MessageLocks { held }
    }

    /// Whether some caller currently holds the lock for `id`.
    pub fn is_locked(&self, id: MessageId) -> bool {
        self.entries
            .lock()
            .get(&id)
            .is_some_and(|entry| entry.is_held())
    }

    /// Number of lock entries ever created.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held message locks, released in reverse order on drop.
#[derive(Debug)]
#[must_use = "locks are released as soon as the guard is dropped"]
pub struct MessageLocks {
    held: Vec<(MessageId, Arc<LockEntry>)>,
}

impl MessageLocks {
    pub fn ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.held.iter().map(|(id, _)| *id)
    }
}

impl Drop for MessageLocks {
    fn drop(&mut self) {
        for (_, entry) in self.held.drain(..).rev() {
            entry.release();
        }
    }
}
