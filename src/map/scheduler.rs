//! Deterministic expiration sweep.
//!
//! The consensus layer never delivers "expire this key" commands; expiry
//! is a side effect of time advancing. Before a command stamped `T`
//! executes, the scheduler converts every TTL node with deadline ≤ `T`
//! into a pending expiration, in ascending `(expiry, key)` order, and the
//! service applies those removals before the command's own effect. Both
//! the order and the lock-deferral rule below are replicated behavior:
//! every replica must fire the same expirations at the same log position.

use crate::core::time::LogicalTime;
use crate::map::store::EntryStore;
use crate::map::ttl::TtlIndex;
use crate::map::txn::LockTable;

/// A single expiration the service must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiration {
    /// Key to remove.
    pub key: String,
    /// The deadline that fired.
    pub deadline: LogicalTime,
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct EventSchedulerStats {
    /// Sweeps performed.
    pub sweeps: u64,
    /// Expirations fired across all sweeps.
    pub fired: u64,
    /// Expirations deferred because the key was write-locked.
    pub deferred: u64,
}

/// Converts due TTL nodes into pending expirations.
#[derive(Debug, Default)]
pub struct EventScheduler {
    stats: EventSchedulerStats,
}

impl EventScheduler {
    /// Create a scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every expiration due at `now`.
    ///
    /// Fired nodes are removed from the index. A node whose key is held
    /// by a prepared transaction stays queued: expiring it would be a
    /// non-owner mutation of a locked key. It fires on the first sweep
    /// after the lock is released. A node whose key no longer carries the
    /// matching TTL is stale and is dropped without firing.
    pub fn sweep(
        &mut self,
        now: LogicalTime,
        ttl: &mut TtlIndex,
        store: &EntryStore,
        locks: &LockTable,
    ) -> Vec<Expiration> {
        self.stats.sweeps += 1;

        let mut fired = Vec::new();
        for node in ttl.due(now) {
            if locks.owner(&node.key).is_some() {
                self.stats.deferred += 1;
                continue;
            }

            ttl.cancel(&node.key);

            let live = store
                .entry(&node.key)
                .and_then(|e| e.expiry())
                .is_some_and(|expiry| expiry == node.expiry);
            if !live {
                continue;
            }

            fired.push(Expiration {
                key: node.key,
                deadline: node.expiry,
            });
        }

        self.stats.fired += fired.len() as u64;
        fired
    }

    /// Scheduler statistics.
    pub fn stats(&self) -> &EventSchedulerStats {
        &self.stats
    }
}
