//! Ordered TTL index.
//!
//! One node per entry with a nonzero TTL, keyed `(expiry, key)`. The
//! ordering is load-bearing: expiration must drain in ascending
//! `(expiry, key)` order on every replica, and the snapshot codec emits
//! the index in exactly this order.
//!
//! Effective writes re-arm or clear a key's node; rejected and no-op
//! mutations never touch the index.

use crate::core::time::LogicalTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A serializable TTL node for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRecord {
    /// Expiry deadline.
    pub expiry: LogicalTime,
    /// Key that expires at `expiry`.
    pub key: String,
}

/// TTL index statistics.
#[derive(Debug, Clone, Default)]
pub struct TtlIndexStats {
    /// Number of keys with pending expiry.
    pub scheduled: usize,
    /// Earliest pending deadline, if any.
    pub next_expiry_ms: Option<u64>,
}

/// Ordered index of pending expirations.
#[derive(Debug, Default)]
pub struct TtlIndex {
    /// `(expiry, key)` nodes in drain order.
    by_deadline: BTreeSet<(LogicalTime, String)>,
    /// Current deadline per key; authoritative for membership.
    by_key: BTreeMap<String, LogicalTime>,
}

impl TtlIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the expiry node for a key.
    pub fn schedule(&mut self, key: &str, expiry: LogicalTime) {
        if let Some(previous) = self.by_key.insert(key.to_string(), expiry) {
            self.by_deadline.remove(&(previous, key.to_string()));
        }
        self.by_deadline.insert((expiry, key.to_string()));
    }

    /// Drop the expiry node for a key, if one exists.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(expiry) => {
                self.by_deadline.remove(&(expiry, key.to_string()));
                true
            }
            None => false,
        }
    }

    /// The deadline currently armed for a key.
    pub fn deadline(&self, key: &str) -> Option<LogicalTime> {
        self.by_key.get(key).copied()
    }

    /// Nodes due at or before `now`, in ascending `(expiry, key)` order.
    /// The nodes stay in the index; callers remove the ones they act on
    /// via [`cancel`](Self::cancel).
    pub fn due(&self, now: LogicalTime) -> Vec<TtlRecord> {
        self.by_deadline
            .iter()
            .take_while(|(expiry, _)| now.is_at_or_after(*expiry))
            .map(|(expiry, key)| TtlRecord {
                expiry: *expiry,
                key: key.clone(),
            })
            .collect()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<LogicalTime> {
        self.by_deadline.iter().next().map(|(expiry, _)| *expiry)
    }

    /// Number of keys with pending expiry.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether no expirations are pending.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Drop all nodes.
    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.by_key.clear();
    }

    /// All nodes in drain order, for snapshots.
    pub fn to_records(&self) -> Vec<TtlRecord> {
        self.by_deadline
            .iter()
            .map(|(expiry, key)| TtlRecord {
                expiry: *expiry,
                key: key.clone(),
            })
            .collect()
    }

    /// Rebuild an index from snapshot records.
    pub fn from_records(records: Vec<TtlRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.schedule(&record.key, record.expiry);
        }
        index
    }

    /// Index statistics.
    pub fn stats(&self) -> TtlIndexStats {
        TtlIndexStats {
            scheduled: self.by_key.len(),
            next_expiry_ms: self.next_deadline().map(|t| t.ms),
        }
    }
}
