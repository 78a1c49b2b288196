//! Shared pending-restart set
//!
//! The only state shared between the filesystem-event side and the batch
//! loop. A service appears at most once; `drain` snapshots and clears in one
//! critical section, so a concurrent `mark` lands either in the snapshot
//! being taken or in the next one, never nowhere.

use std::collections::HashSet;
use std::mem;
use std::sync::Mutex;

/// Concurrency-safe set of services awaiting restart
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: Mutex<HashSet<String>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge services into the pending set. Safe from any thread; the lock
    /// is held only for the insertion.
    pub fn mark<I, S>(&self, services: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pending = self.lock();
        pending.extend(services.into_iter().map(Into::into));
    }

    /// Atomically capture the pending set and reset it to empty
    pub fn drain(&self) -> HashSet<String> {
        mem::take(&mut *self.lock())
    }

    /// Number of services currently pending
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned lock means a producer panicked mid-insert; the set
        // itself is still a valid HashSet, so keep going.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
