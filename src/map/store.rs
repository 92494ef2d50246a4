//! Entry store and version counter.
//!
//! The primary in-memory mapping from key to versioned entry, plus the
//! single global version counter. Every successful mutation draws exactly
//! one new version from the counter; conditional mutations whose
//! precondition fails draw none and leave the store untouched.
//!
//! The store is deliberately unaware of write locks and TTL nodes: the
//! service checks the lock table before calling a mutation, and feeds the
//! TTL index from the returned [`UpdateResult`]. Keeping those concerns
//! out of the store keeps each mutation a single, inspectable state
//! transition.

use crate::core::time::LogicalTime;
use crate::map::versioned::Versioned;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Outcome classification for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// The mutation took effect.
    Ok,
    /// The mutation was a no-op (e.g. `put_if_absent` on a present key,
    /// `remove` of an absent key).
    Noop,
    /// The key is write-locked by a prepared transaction.
    WriteLock,
    /// A value or version precondition did not hold.
    PreconditionFailed,
}

/// Result of a mutation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Outcome classification.
    pub status: UpdateStatus,

    /// The key the mutation addressed.
    pub key: String,

    /// Entry value before the mutation, if the key was present.
    pub old: Option<Versioned>,

    /// Entry value after the mutation, if the key is present.
    pub new: Option<Versioned>,
}

impl UpdateResult {
    /// An effective mutation.
    pub fn ok(key: impl Into<String>, old: Option<Versioned>, new: Option<Versioned>) -> Self {
        Self {
            status: UpdateStatus::Ok,
            key: key.into(),
            old,
            new,
        }
    }

    /// A mutation that had nothing to do.
    pub fn noop(key: impl Into<String>, current: Option<Versioned>) -> Self {
        Self {
            status: UpdateStatus::Noop,
            key: key.into(),
            old: current,
            new: None,
        }
    }

    /// A mutation rejected because the key is write-locked.
    pub fn write_lock(key: impl Into<String>, current: Option<Versioned>) -> Self {
        Self {
            status: UpdateStatus::WriteLock,
            key: key.into(),
            old: current,
            new: None,
        }
    }

    /// A mutation whose precondition did not hold.
    pub fn precondition_failed(key: impl Into<String>, current: Option<Versioned>) -> Self {
        Self {
            status: UpdateStatus::PreconditionFailed,
            key: key.into(),
            old: current,
            new: None,
        }
    }

    /// Whether the mutation changed the store.
    pub fn is_effective(&self) -> bool {
        self.status == UpdateStatus::Ok
    }
}

/// A stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    /// The opaque value bytes.
    pub value: Bytes,

    /// Version issued by the mutation that wrote this value.
    pub version: u64,

    /// Logical time of the write.
    pub created: LogicalTime,

    /// Time-to-live in milliseconds. Zero means no expiry.
    pub ttl_ms: u64,
}

impl MapEntry {
    /// The versioned view of this entry.
    pub fn versioned(&self) -> Versioned {
        Versioned {
            value: self.value.clone(),
            version: self.version,
            created: self.created,
        }
    }

    /// Expiry deadline, if this entry carries a TTL.
    pub fn expiry(&self) -> Option<LogicalTime> {
        if self.ttl_ms == 0 {
            None
        } else {
            Some(self.created.add_ms(self.ttl_ms))
        }
    }
}

/// A serializable entry record for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub key: String,
    pub value: Bytes,
    pub version: u64,
    pub created: LogicalTime,
    pub ttl_ms: u64,
}

/// Entry store statistics.
#[derive(Debug, Clone, Default)]
pub struct EntryStoreStats {
    /// Number of live entries.
    pub entries: usize,
    /// Current value of the global version counter.
    pub version_counter: u64,
    /// Total bytes held in values.
    pub value_bytes: usize,
}

/// The key → entry mapping and the global version counter.
///
/// Keys iterate in lexicographic order, which pins the deterministic
/// orderings the rest of the machine relies on: `clear` event order and
/// the entries section of snapshots.
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: BTreeMap<String, MapEntry>,
    version_counter: u64,
}

impl EntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the global version counter.
    pub fn version_counter(&self) -> u64 {
        self.version_counter
    }

    /// Current version of a key: the entry's version, or zero when the
    /// key is absent. Zero doubles as the expected-version fence for
    /// "key must not exist" transactional preconditions.
    pub fn current_version(&self, key: &str) -> u64 {
        self.entries.get(key).map(|e| e.version).unwrap_or(0)
    }

    fn next_version(&mut self) -> u64 {
        self.version_counter += 1;
        self.version_counter
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether any entry holds exactly these value bytes. Linear scan.
    pub fn contains_value(&self, value: &[u8]) -> bool {
        self.entries.values().any(|e| e.value.as_ref() == value)
    }

    /// The versioned value for a key, if present.
    pub fn get(&self, key: &str) -> Option<Versioned> {
        self.entries.get(key).map(MapEntry::versioned)
    }

    /// The raw entry for a key, if present.
    pub fn entry(&self, key: &str) -> Option<&MapEntry> {
        self.entries.get(key)
    }

    /// The present subset of the requested keys. Duplicate keys collapse.
    pub fn get_all_present(&self, keys: &[String]) -> BTreeMap<String, Versioned> {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(entry) = self.entries.get(key) {
                out.insert(key.clone(), entry.versioned());
            }
        }
        out
    }

    /// The versioned value for a key, or a zero-version wrapper around
    /// the provided default bytes stamped at `now`.
    pub fn get_or_default(&self, key: &str, default: Bytes, now: LogicalTime) -> Versioned {
        match self.entries.get(key) {
            Some(entry) => entry.versioned(),
            None => Versioned {
                value: default,
                version: 0,
                created: now,
            },
        }
    }

    /// Snapshot of all keys, in key order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Snapshot of all values, in key order.
    pub fn values(&self) -> Vec<Versioned> {
        self.entries.values().map(MapEntry::versioned).collect()
    }

    /// Snapshot of all entries, in key order.
    pub fn entry_set(&self) -> Vec<(String, Versioned)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.versioned()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Unconditional write. Returns the previous value in `old` and the
    /// written value in `new`.
    pub fn put(&mut self, key: &str, value: Bytes, ttl_ms: u64, now: LogicalTime) -> UpdateResult {
        let old = self.get(key);
        let version = self.next_version();
        let entry = MapEntry {
            value,
            version,
            created: now,
            ttl_ms,
        };
        let new = entry.versioned();
        self.entries.insert(key.to_string(), entry);
        UpdateResult::ok(key, old, Some(new))
    }

    /// Write only when the key is absent. When present, the current value
    /// is returned unchanged under `Noop`.
    pub fn put_if_absent(
        &mut self,
        key: &str,
        value: Bytes,
        ttl_ms: u64,
        now: LogicalTime,
    ) -> UpdateResult {
        if let Some(current) = self.get(key) {
            return UpdateResult::noop(key, Some(current));
        }
        self.put(key, value, ttl_ms, now)
    }

    /// Unconditional removal. Absent keys are a no-op.
    pub fn remove(&mut self, key: &str) -> UpdateResult {
        match self.entries.remove(key) {
            Some(entry) => UpdateResult::ok(key, Some(entry.versioned()), None),
            None => UpdateResult::noop(key, None),
        }
    }

    /// Remove only when the current value equals `expected`.
    pub fn remove_if_value(&mut self, key: &str, expected: &[u8]) -> UpdateResult {
        let current = self.get(key);
        match current {
            Some(ref cur) if cur.value.as_ref() == expected => self.remove(key),
            current => UpdateResult::precondition_failed(key, current),
        }
    }

    /// Remove only when the current version equals `expected`.
    pub fn remove_if_version(&mut self, key: &str, expected: u64) -> UpdateResult {
        let current = self.get(key);
        match current {
            Some(ref cur) if cur.version == expected => self.remove(key),
            current => UpdateResult::precondition_failed(key, current),
        }
    }

    /// Replace the value of a present key. Absent keys fail the
    /// presence precondition.
    pub fn replace(&mut self, key: &str, value: Bytes, now: LogicalTime) -> UpdateResult {
        if !self.entries.contains_key(key) {
            return UpdateResult::precondition_failed(key, None);
        }
        // A replace does not re-arm TTL: the new value carries none.
        self.put(key, value, 0, now)
    }

    /// Replace only when the current value equals `old_value`.
    pub fn replace_if_value(
        &mut self,
        key: &str,
        old_value: &[u8],
        new_value: Bytes,
        now: LogicalTime,
    ) -> UpdateResult {
        let current = self.get(key);
        match current {
            Some(ref cur) if cur.value.as_ref() == old_value => self.put(key, new_value, 0, now),
            current => UpdateResult::precondition_failed(key, current),
        }
    }

    /// Replace only when the current version equals `old_version`.
    pub fn replace_if_version(
        &mut self,
        key: &str,
        old_version: u64,
        new_value: Bytes,
        now: LogicalTime,
    ) -> UpdateResult {
        let current = self.get(key);
        match current {
            Some(ref cur) if cur.version == old_version => self.put(key, new_value, 0, now),
            current => UpdateResult::precondition_failed(key, current),
        }
    }

    /// Remove every entry except the keys in `skip`, returning the
    /// removed `(key, value)` pairs in ascending key order.
    pub fn clear_except(&mut self, skip: &BTreeSet<String>) -> Vec<(String, Versioned)> {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|k| !skip.contains(*k))
            .cloned()
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            if let Some(entry) = self.entries.remove(&key) {
                removed.push((key, entry.versioned()));
            }
        }
        removed
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// All entries as serializable records, in key order.
    pub fn to_records(&self) -> Vec<EntryRecord> {
        self.entries
            .iter()
            .map(|(key, e)| EntryRecord {
                key: key.clone(),
                value: e.value.clone(),
                version: e.version,
                created: e.created,
                ttl_ms: e.ttl_ms,
            })
            .collect()
    }

    /// Rebuild a store from snapshot records.
    pub fn from_records(records: Vec<EntryRecord>, version_counter: u64) -> Self {
        let mut entries = BTreeMap::new();
        for record in records {
            entries.insert(
                record.key,
                MapEntry {
                    value: record.value,
                    version: record.version,
                    created: record.created,
                    ttl_ms: record.ttl_ms,
                },
            );
        }
        Self {
            entries,
            version_counter,
        }
    }

    /// Store statistics.
    pub fn stats(&self) -> EntryStoreStats {
        EntryStoreStats {
            entries: self.entries.len(),
            version_counter: self.version_counter,
            value_bytes: self.entries.values().map(|e| e.value.len()).sum(),
        }
    }
}
