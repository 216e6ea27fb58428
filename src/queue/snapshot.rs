//! Published queue depth.
//!
//! A [`SnapshotStore`] is owned by one aggregator and shared by reference
//! with any number of readers. The guarded value is two scalars, so a read
//! holds the lock only for a copy.

use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

/// Summed pending-request count and when it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub count: u64,
    pub observed_at: SystemTime,
}

/// Single-writer, many-reader holder of the latest [`QueueSnapshot`].
#[derive(Debug)]
pub struct SnapshotStore {
    inner: RwLock<QueueSnapshot>,
}

impl SnapshotStore {
    /// Starts at zero, observed now.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(QueueSnapshot {
                count: 0,
                observed_at: SystemTime::now(),
            }),
        }
    }

    /// Latest published pair.
    pub fn read(&self) -> QueueSnapshot {
        // A panicking writer cannot leave two Copy scalars half-written.
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the pair with `(count, now)`.
    pub fn publish(&self, count: u64) -> QueueSnapshot {
        self.publish_at(count, SystemTime::now())
    }

    pub fn publish_at(&self, count: u64, observed_at: SystemTime) -> QueueSnapshot {
        let snapshot = QueueSnapshot { count, observed_at };
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        snapshot
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
