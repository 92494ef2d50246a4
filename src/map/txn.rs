//! Optimistic two-phase-commit transactions.
//!
//! A transaction proposes a batch of per-key updates, each fenced by the
//! version the client observed when it read the key. `prepare` validates
//! every fence and takes exclusive write locks on all target keys, or
//! takes none; `commit` applies the staged batch atomically; `rollback`
//! (or a prepare conflict) discards it.
//!
//! ```text
//!         begin                    prepare (ok)             commit
//!   ∅ ──────────▶ ACTIVE ────────────▶ PREPARED ──────────▶ COMMITTED ──▶ ∅
//!         │                               │
//!         │         prepare (conflict)    │ rollback
//!         └───────────────────────────────▶ ROLLED_BACK ──▶ ∅
//! ```
//!
//! The lock table holds a key exactly while a PREPARED transaction owns
//! it, so it is rebuilt from the transaction records on snapshot restore
//! rather than serialized on its own.

use crate::core::error::{KeystoneError, KeystoneResult};
use crate::map::store::EntryStore;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Opaque transaction identifier, assigned by the coordinating client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle state of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnState {
    /// Registered via `begin`, nothing staged yet.
    Active,
    /// All locks held, updates staged, awaiting commit or rollback.
    Prepared,
    /// Terminal: updates applied. Records never persist in this state.
    Committed,
    /// Terminal: updates discarded. Records never persist in this state.
    RolledBack,
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// One tentative update inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagedUpdate {
    /// Write `value` to `key`. `expect` fences on the version the client
    /// read (zero meaning "key must be absent"); `None` is unconditional.
    Put {
        key: String,
        value: Bytes,
        expect: Option<u64>,
    },
    /// Remove `key`, with the same fencing rules as `Put`.
    Remove { key: String, expect: Option<u64> },
    /// Assert the key's version without writing (read-your-write fence).
    /// Validated at prepare, a no-op at commit.
    Lock { key: String, expect: u64 },
}

impl StagedUpdate {
    /// The key this update targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Remove { key, .. } | Self::Lock { key, .. } => key,
        }
    }

    /// The expected-version fence, if the update carries one.
    pub fn expected_version(&self) -> Option<u64> {
        match self {
            Self::Put { expect, .. } | Self::Remove { expect, .. } => *expect,
            Self::Lock { expect, .. } => Some(*expect),
        }
    }

    /// Whether the update writes at commit time.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Lock { .. })
    }
}

/// The batch a client proposes for atomic application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    /// Transaction identifier.
    pub id: TransactionId,
    /// Version the client observed at transaction start.
    pub version: u64,
    /// Updates in client order. Validation and lock acquisition follow
    /// this order exactly.
    pub updates: Vec<StagedUpdate>,
}

/// A registered transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction identifier.
    pub id: TransactionId,
    /// Session that owns the transaction.
    pub session: u64,
    /// Current lifecycle state.
    pub state: TxnState,
    /// Version observed at `begin` (or carried by the first prepare).
    pub start_version: u64,
    /// Staged updates; empty until prepared.
    pub staged: Vec<StagedUpdate>,
}

/// Outcome of `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareResult {
    /// All fences held; locks taken; updates staged.
    Ok,
    /// A target key is locked by a different prepared transaction.
    ConcurrentTransaction,
    /// An expected-version fence did not match the current version.
    OptimisticLockFailure,
    /// Reserved.
    PartialFailure,
}

/// Outcome of `commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitResult {
    /// Staged updates applied and locks released.
    Ok,
    /// No record exists for the id.
    UnknownTransactionId,
    /// The record exists but is not in the PREPARED state.
    FailureDuringCommit,
}

/// Outcome of `rollback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackResult {
    /// Locks released, staged updates discarded.
    Ok,
    /// No record exists for the id.
    UnknownTransactionId,
}

/// Per-key exclusive write locks held by prepared transactions.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: BTreeMap<String, TransactionId>,
}

impl LockTable {
    /// The transaction currently holding a key, if any.
    pub fn owner(&self, key: &str) -> Option<&TransactionId> {
        self.locks.get(key)
    }

    /// Whether `key` is held by a transaction other than `id`.
    pub fn is_locked_by_other(&self, key: &str, id: &TransactionId) -> bool {
        self.locks.get(key).is_some_and(|owner| owner != id)
    }

    fn acquire(&mut self, key: &str, id: TransactionId) {
        self.locks.insert(key.to_string(), id);
    }

    fn release(&mut self, key: &str) {
        self.locks.remove(key);
    }

    fn release_owned_by(&mut self, id: &TransactionId) -> usize {
        let owned: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, owner)| *owner == id)
            .map(|(key, _)| key.clone())
            .collect();
        let released = owned.len();
        for key in owned {
            self.locks.remove(&key);
        }
        released
    }

    /// All locked keys, in key order.
    pub fn locked_keys(&self) -> BTreeSet<String> {
        self.locks.keys().cloned().collect()
    }

    /// Number of locked keys.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no locks are held.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Transaction manager statistics.
#[derive(Debug, Clone, Default)]
pub struct TransactionManagerStats {
    /// Records in the ACTIVE state.
    pub active: usize,
    /// Records in the PREPARED state.
    pub prepared: usize,
    /// Keys currently write-locked.
    pub locked_keys: usize,
}

/// Registry of in-flight transactions and their locks.
#[derive(Debug, Default)]
pub struct TransactionManager {
    records: BTreeMap<TransactionId, TransactionRecord>,
    locks: LockTable,
}

impl TransactionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock table.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// The record for an id, if one exists.
    pub fn record(&self, id: &TransactionId) -> Option<&TransactionRecord> {
        self.records.get(id)
    }

    /// Register a transaction and return its start version.
    ///
    /// Idempotent: repeated calls with the same id return the version
    /// issued by the first call.
    pub fn begin(&mut self, id: TransactionId, session: u64, current_version: u64) -> u64 {
        if let Some(existing) = self.records.get(&id) {
            return existing.start_version;
        }
        self.records.insert(
            id.clone(),
            TransactionRecord {
                id,
                session,
                state: TxnState::Active,
                start_version: current_version,
                staged: Vec::new(),
            },
        );
        current_version
    }

    /// Validate a transaction log and stage it.
    ///
    /// Updates are checked in log order; the first failing fence decides
    /// the result. Lock acquisition follows the same order, and a failure
    /// releases every lock taken during this prepare before the record is
    /// erased (the conflict edge of the state diagram).
    pub fn prepare(
        &mut self,
        log: TransactionLog,
        session: u64,
        store: &EntryStore,
    ) -> PrepareResult {
        if let Some(existing) = self.records.get(&log.id) {
            if existing.state == TxnState::Prepared {
                return PrepareResult::ConcurrentTransaction;
            }
        }

        let mut acquired: Vec<String> = Vec::new();
        let mut failure: Option<PrepareResult> = None;

        for update in &log.updates {
            let key = update.key();

            if self.locks.is_locked_by_other(key, &log.id) {
                failure = Some(PrepareResult::ConcurrentTransaction);
                break;
            }

            if let Some(expect) = update.expected_version() {
                if store.current_version(key) != expect {
                    failure = Some(PrepareResult::OptimisticLockFailure);
                    break;
                }
            }

            if self.locks.owner(key).is_none() {
                self.locks.acquire(key, log.id.clone());
                acquired.push(key.to_string());
            }
        }

        if let Some(result) = failure {
            for key in acquired {
                self.locks.release(&key);
            }
            self.records.remove(&log.id);
            tracing::debug!(txn = %log.id, ?result, "prepare rejected");
            return result;
        }

        let start_version = self
            .records
            .get(&log.id)
            .map(|r| r.start_version)
            .unwrap_or(log.version);

        self.records.insert(
            log.id.clone(),
            TransactionRecord {
                id: log.id,
                session,
                state: TxnState::Prepared,
                start_version,
                staged: log.updates,
            },
        );
        PrepareResult::Ok
    }

    /// Take a prepared transaction for application.
    ///
    /// On success the record is erased, its locks are released, and the
    /// staged updates are returned for the caller to apply. The error
    /// carries the client-visible commit result.
    pub fn commit(&mut self, id: &TransactionId) -> Result<Vec<StagedUpdate>, CommitResult> {
        let record = match self.records.remove(id) {
            None => return Err(CommitResult::UnknownTransactionId),
            Some(record) => record,
        };
        if record.state != TxnState::Prepared {
            self.records.insert(id.clone(), record);
            return Err(CommitResult::FailureDuringCommit);
        }
        self.locks.release_owned_by(id);
        Ok(record.staged)
    }

    /// Discard a transaction, releasing any locks it holds.
    ///
    /// Legal from both ACTIVE and PREPARED.
    pub fn rollback(&mut self, id: &TransactionId) -> RollbackResult {
        match self.records.remove(id) {
            Some(_) => {
                self.locks.release_owned_by(id);
                RollbackResult::Ok
            }
            None => RollbackResult::UnknownTransactionId,
        }
    }

    /// Garbage-collect a closed session's ACTIVE transactions.
    ///
    /// PREPARED records survive: a recovering coordinator must still be
    /// able to finish the protocol with an explicit commit or rollback.
    pub fn expire_session(&mut self, session: u64) -> Vec<TransactionId> {
        let doomed: Vec<TransactionId> = self
            .records
            .values()
            .filter(|r| r.session == session && r.state == TxnState::Active)
            .map(|r| r.id.clone())
            .collect();

        for id in &doomed {
            self.records.remove(id);
        }
        doomed
    }

    /// All records in id order, for snapshots.
    pub fn to_records(&self) -> Vec<TransactionRecord> {
        self.records.values().cloned().collect()
    }

    /// Rebuild the manager (and lock table) from snapshot records.
    ///
    /// Records only ever persist in ACTIVE or PREPARED; the terminal
    /// states are erased at the transition. A terminal record in the
    /// input means the source replica broke the transaction lifecycle,
    /// which is fatal.
    pub fn from_records(records: Vec<TransactionRecord>) -> KeystoneResult<Self> {
        let mut manager = Self::new();
        for record in records {
            match record.state {
                TxnState::Active => {}
                TxnState::Prepared => {
                    for update in &record.staged {
                        manager.locks.acquire(update.key(), record.id.clone());
                    }
                }
                TxnState::Committed | TxnState::RolledBack => {
                    return Err(KeystoneError::illegal_transaction_state(
                        record.id.as_str(),
                        record.state.to_string(),
                    ));
                }
            }
            manager.records.insert(record.id.clone(), record);
        }
        Ok(manager)
    }

    /// Manager statistics.
    pub fn stats(&self) -> TransactionManagerStats {
        let active = self
            .records
            .values()
            .filter(|r| r.state == TxnState::Active)
            .count();
        TransactionManagerStats {
            active,
            prepared: self.records.len() - active,
            locked_keys: self.locks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::LogicalTime;

    fn put(key: &str, expect: u64) -> StagedUpdate {
        StagedUpdate::Put {
            key: key.to_string(),
            value: Bytes::from_static(b"x"),
            expect: Some(expect),
        }
    }

    fn log(id: &str, updates: Vec<StagedUpdate>) -> TransactionLog {
        TransactionLog {
            id: TransactionId::from(id),
            version: 0,
            updates,
        }
    }

    #[test]
    fn begin_is_idempotent() {
        let mut mgr = TransactionManager::new();
        assert_eq!(mgr.begin(TransactionId::from("t1"), 1, 7), 7);
        assert_eq!(mgr.begin(TransactionId::from("t1"), 1, 99), 7);
    }

    #[test]
    fn failed_prepare_releases_partial_locks() {
        let mut mgr = TransactionManager::new();
        let mut store = EntryStore::new();
        store.put("a", Bytes::from_static(b"1"), 0, LogicalTime::zero());

        // "a" is at version 1; the second update's fence cannot hold.
        let result = mgr.prepare(log("t1", vec![put("a", 1), put("b", 5)]), 1, &store);
        assert_eq!(result, PrepareResult::OptimisticLockFailure);
        assert!(mgr.locks().is_empty());
        assert!(mgr.record(&TransactionId::from("t1")).is_none());
    }

    #[test]
    fn second_transaction_conflicts_on_locked_key() {
        let mut mgr = TransactionManager::new();
        let store = EntryStore::new();

        assert_eq!(
            mgr.prepare(log("t1", vec![put("k", 0)]), 1, &store),
            PrepareResult::Ok
        );
        assert_eq!(
            mgr.prepare(log("t2", vec![put("k", 0)]), 2, &store),
            PrepareResult::ConcurrentTransaction
        );
        assert_eq!(
            mgr.locks().owner("k"),
            Some(&TransactionId::from("t1"))
        );
    }

    #[test]
    fn commit_requires_prepared() {
        let mut mgr = TransactionManager::new();
        let store = EntryStore::new();

        let t1 = TransactionId::from("t1");
        mgr.begin(t1.clone(), 1, 0);
        assert_eq!(mgr.commit(&t1), Err(CommitResult::FailureDuringCommit));
        assert_eq!(
            mgr.commit(&TransactionId::from("nope")),
            Err(CommitResult::UnknownTransactionId)
        );

        mgr.prepare(log("t1", vec![put("k", 0)]), 1, &store);
        let staged = mgr.commit(&t1).unwrap();
        assert_eq!(staged.len(), 1);
        assert!(mgr.locks().is_empty());
        assert!(mgr.record(&t1).is_none());
    }

    #[test]
    fn session_expiry_keeps_prepared_records() {
        let mut mgr = TransactionManager::new();
        let store = EntryStore::new();

        mgr.begin(TransactionId::from("active"), 9, 0);
        mgr.prepare(log("prepared", vec![put("k", 0)]), 9, &store);

        let gced = mgr.expire_session(9);
        assert_eq!(gced, vec![TransactionId::from("active")]);
        assert!(mgr.record(&TransactionId::from("prepared")).is_some());
        assert_eq!(mgr.locks().len(), 1);
    }

    #[test]
    fn restore_rebuilds_lock_table() {
        let mut mgr = TransactionManager::new();
        let store = EntryStore::new();
        mgr.prepare(log("t1", vec![put("k", 0)]), 1, &store);

        let restored = TransactionManager::from_records(mgr.to_records()).unwrap();
        assert!(restored.locks().is_locked_by_other("k", &TransactionId::from("t2")));
        assert_eq!(restored.stats().prepared, 1);
    }

    #[test]
    fn terminal_records_cannot_be_restored() {
        let record = TransactionRecord {
            id: TransactionId::from("t1"),
            session: 1,
            state: TxnState::Committed,
            start_version: 0,
            staged: Vec::new(),
        };

        let err = TransactionManager::from_records(vec![record]).unwrap_err();
        assert!(matches!(err, KeystoneError::IllegalTransactionState { .. }));
        assert!(err.is_fatal());
    }
}
