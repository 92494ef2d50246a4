//! The map state machine.
//!
//! [`MapService`] owns every replicated structure — entry store, TTL
//! index, transaction manager, listener registry — and is driven by the
//! consensus layer: commands arrive in log order with a monotone
//! timestamp, queries are served from the state as of the last applied
//! command. Application is strictly sequential; handlers are plain
//! functions from `(state, command, timestamp)` to
//! `(state', response, events)` and perform no I/O.
//!
//! Before a command executes, the clock advances to the command's
//! timestamp and due expirations fire (in deterministic order), so a
//! command never observes an entry whose TTL elapsed at an earlier
//! timestamp.

use crate::core::config::Config;
use crate::core::error::KeystoneResult;
use crate::core::time::LogicalTime;
use crate::map::events::MapEvent;
use crate::map::listener::{
    ListenerEvent, ListenerRecord, ListenerRegistry, ListenerRegistryStats,
};
use crate::map::ops::{Operation, OperationKind, Response, ResponseError};
use crate::map::scheduler::{EventScheduler, EventSchedulerStats};
use crate::map::store::{EntryRecord, EntryStore, EntryStoreStats, UpdateResult};
use crate::map::ttl::{TtlIndex, TtlIndexStats, TtlRecord};
use crate::map::txn::{
    CommitResult, PrepareResult, StagedUpdate, TransactionLog, TransactionManager,
    TransactionManagerStats, TransactionRecord,
};
use bytes::Bytes;

/// Envelope metadata for a command delivered by the consensus layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    /// Log index of the command.
    pub index: u64,
    /// Monotone logical timestamp assigned by the consensus layer.
    pub timestamp: LogicalTime,
    /// Session that issued the command.
    pub session: u64,
    /// Session-scoped sequence number (tracked by the session layer).
    pub sequence: u64,
}

/// Consistency level requested for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    /// The consensus layer has confirmed leadership/read-index for this
    /// read; serve from current applied state.
    Linearizable,
    /// Serve only if the applied index has reached the client's fence.
    Sequential,
}

/// Envelope metadata for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryContext {
    /// Session issuing the query.
    pub session: u64,
    /// Minimum applied index the reply must reflect.
    pub min_index: u64,
    /// Requested consistency level.
    pub consistency: ReadConsistency,
}

impl QueryContext {
    /// Context for a linearizable read.
    pub fn linearizable(session: u64) -> Self {
        Self {
            session,
            min_index: 0,
            consistency: ReadConsistency::Linearizable,
        }
    }

    /// Context for a sequential read fenced at `min_index`.
    pub fn sequential(session: u64, min_index: u64) -> Self {
        Self {
            session,
            min_index,
            consistency: ReadConsistency::Sequential,
        }
    }
}

/// Combined service statistics.
#[derive(Debug, Clone)]
pub struct MapServiceStats {
    /// Last applied log index.
    pub last_applied: u64,
    /// Current logical time in milliseconds.
    pub now_ms: u64,
    /// Entry store statistics.
    pub store: EntryStoreStats,
    /// TTL index statistics.
    pub ttl: TtlIndexStats,
    /// Scheduler statistics.
    pub scheduler: EventSchedulerStats,
    /// Transaction manager statistics.
    pub transactions: TransactionManagerStats,
    /// Listener registry statistics.
    pub listeners: ListenerRegistryStats,
}

/// The complete replicated state, ready for the snapshot codec.
///
/// Collections are emitted in their defined sort orders (entries by key,
/// TTL nodes by `(expiry, key)`, transactions by id, listeners by
/// session), so two replicas at the same log position produce identical
/// images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSnapshot {
    /// Global version counter.
    pub version_counter: u64,
    /// Last applied log index.
    pub last_applied: u64,
    /// Logical time at snapshot.
    pub now: LogicalTime,
    /// Entries, sorted by key.
    pub entries: Vec<EntryRecord>,
    /// TTL nodes, sorted by expiry then key.
    pub ttl: Vec<TtlRecord>,
    /// Transaction records, sorted by id.
    pub transactions: Vec<TransactionRecord>,
    /// Listener subscriptions, sorted by session.
    pub listeners: Vec<ListenerRecord>,
}

/// The replicated, versioned, transactional map.
#[derive(Debug)]
pub struct MapService {
    config: Config,
    store: EntryStore,
    ttl: TtlIndex,
    scheduler: EventScheduler,
    txns: TransactionManager,
    listeners: ListenerRegistry,
    last_applied: u64,
    now: LogicalTime,
}

impl MapService {
    /// Create a service with the given configuration.
    pub fn new(config: Config) -> Self {
        let capacity = config.listener.queue_capacity;
        Self {
            config,
            store: EntryStore::new(),
            ttl: TtlIndex::new(),
            scheduler: EventScheduler::new(),
            txns: TransactionManager::new(),
            listeners: ListenerRegistry::new(capacity),
            last_applied: 0,
            now: LogicalTime::zero(),
        }
    }

    /// Create a service with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Last applied log index.
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Current logical time.
    pub fn now(&self) -> LogicalTime {
        self.now
    }

    /// Read access to the entry store.
    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Read access to the transaction manager.
    pub fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    /// Drain queued events for a session (called by the session layer).
    pub fn drain_events(&mut self, session: u64) -> Vec<ListenerEvent> {
        self.listeners.drain(session)
    }

    /// Combined statistics.
    pub fn stats(&self) -> MapServiceStats {
        MapServiceStats {
            last_applied: self.last_applied,
            now_ms: self.now.ms,
            store: self.store.stats(),
            ttl: self.ttl.stats(),
            scheduler: self.scheduler.stats().clone(),
            transactions: self.txns.stats(),
            listeners: self.listeners.stats(),
        }
    }

    // ------------------------------------------------------------------
    // Command path
    // ------------------------------------------------------------------

    /// Apply a command delivered by the consensus layer.
    ///
    /// Must be called in strictly increasing log-index order.
    pub fn apply(&mut self, ctx: &CommandContext, op: Operation) -> Response {
        debug_assert!(
            ctx.index > self.last_applied,
            "command applied out of order: {} after {}",
            ctx.index,
            self.last_applied
        );

        self.advance_to(ctx.timestamp);

        let response = match op {
            Operation::Put {
                key,
                value,
                ttl_ms,
            } => self.handle_put(&key, value, ttl_ms),
            Operation::PutIfAbsent {
                key,
                value,
                ttl_ms,
            } => self.handle_put_if_absent(&key, value, ttl_ms),
            Operation::PutAndGet {
                key,
                value,
                ttl_ms,
            } => self.handle_put(&key, value, ttl_ms),
            Operation::Remove { key } => self.handle_remove(&key),
            Operation::RemoveValue { key, value } => self.handle_remove_value(&key, &value),
            Operation::RemoveVersion { key, version } => {
                self.handle_remove_version(&key, version)
            }
            Operation::Replace { key, value } => self.handle_replace(&key, value),
            Operation::ReplaceValue {
                key,
                old_value,
                new_value,
            } => self.handle_replace_value(&key, &old_value, new_value),
            Operation::ReplaceVersion {
                key,
                old_version,
                new_value,
            } => self.handle_replace_version(&key, old_version, new_value),
            Operation::Clear => self.handle_clear(),
            Operation::AddListener { filters } => {
                self.listeners.add(ctx.session, filters);
                Response::Unit
            }
            Operation::RemoveListener => {
                self.listeners.remove(ctx.session);
                Response::Unit
            }
            Operation::Prepare { log } => {
                Response::Prepare(self.txns.prepare(log, ctx.session, &self.store))
            }
            Operation::PrepareAndCommit { log } => self.handle_prepare_and_commit(ctx, log),
            Operation::Commit { id } => match self.txns.commit(&id) {
                Ok(staged) => {
                    self.apply_staged(staged);
                    Response::Commit(CommitResult::Ok)
                }
                Err(result) => Response::Commit(result),
            },
            Operation::Rollback { id } => Response::Rollback(self.txns.rollback(&id)),
            Operation::SessionExpire { session } => self.handle_session_expire(session),

            // A query-shaped entry in the log is legal: serve it from the
            // post-sweep state at this position.
            other => self.execute_read(ctx.session, other),
        };

        self.last_applied = ctx.index;
        response
    }

    // ------------------------------------------------------------------
    // Query path
    // ------------------------------------------------------------------

    /// Serve a query against applied state.
    ///
    /// Never advances the clock and never drains the TTL index: an entry
    /// whose TTL elapsed since the last command is still visible until
    /// the next command drains it.
    pub fn query(&mut self, ctx: &QueryContext, op: Operation) -> Response {
        if op.kind() != OperationKind::Query {
            return Response::malformed(format!("{} is not a query", op.name()));
        }

        if ctx.consistency == ReadConsistency::Sequential && self.last_applied < ctx.min_index {
            return Response::Error(ResponseError::ReadNotReady {
                applied: self.last_applied,
                required: ctx.min_index,
            });
        }

        self.execute_read(ctx.session, op)
    }

    fn execute_read(&mut self, session: u64, op: Operation) -> Response {
        match op {
            Operation::Size => Response::Size(self.store.len() as u64),
            Operation::IsEmpty => Response::Flag(self.store.is_empty()),
            Operation::ContainsKey { key } => Response::Flag(self.store.contains_key(&key)),
            Operation::ContainsValue { value } => {
                Response::Flag(self.store.contains_value(&value))
            }
            Operation::Get { key } => Response::Value(self.store.get(&key)),
            Operation::GetAllPresent { keys } => {
                Response::ValueMap(self.store.get_all_present(&keys))
            }
            Operation::GetOrDefault { key, default } => Response::Value(Some(
                self.store.get_or_default(&key, default, self.now),
            )),
            Operation::KeySet => Response::Keys(self.store.keys()),
            Operation::Values => Response::Values(self.store.values()),
            Operation::EntrySet => Response::Entries(self.store.entry_set()),
            Operation::Begin { id } => {
                let version =
                    self.txns
                        .begin(id, session, self.store.version_counter());
                Response::BeginVersion(version)
            }
            other => Response::malformed(format!("{} is not a query", other.name())),
        }
    }

    // ------------------------------------------------------------------
    // Clock and expiry
    // ------------------------------------------------------------------

    fn advance_to(&mut self, timestamp: LogicalTime) {
        self.now = self.now.later(timestamp);

        let fired = self
            .scheduler
            .sweep(self.now, &mut self.ttl, &self.store, self.txns.locks());
        for expiration in fired {
            let result = self.store.remove(&expiration.key);
            if let Some(old) = result.old {
                self.publish(MapEvent::removed(&expiration.key, old));
            }
        }
    }

    // ------------------------------------------------------------------
    // Write handlers
    // ------------------------------------------------------------------

    fn check_limits(&self, key: &str, value: Option<&Bytes>) -> Option<Response> {
        let limits = &self.config.map;
        if limits.max_key_bytes > 0 && key.len() > limits.max_key_bytes {
            return Some(Response::malformed(format!(
                "key length {} exceeds limit {}",
                key.len(),
                limits.max_key_bytes
            )));
        }
        if let Some(value) = value {
            if limits.max_value_bytes > 0 && value.len() > limits.max_value_bytes {
                return Some(Response::malformed(format!(
                    "value length {} exceeds limit {}",
                    value.len(),
                    limits.max_value_bytes
                )));
            }
        }
        None
    }

    fn enforce_ttl(&self, ttl_ms: u64) -> Result<u64, Response> {
        self.config.ttl.enforce(ttl_ms).map_err(|requested| {
            Response::malformed(format!(
                "ttl {}ms exceeds limit {}ms",
                requested, self.config.ttl.max_ttl_ms
            ))
        })
    }

    fn locked(&self, key: &str) -> bool {
        self.txns.locks().owner(key).is_some()
    }

    /// Record the side effects of an effective write: TTL node and event.
    fn finish_write(&mut self, result: &UpdateResult, ttl_ms: u64) {
        if !result.is_effective() {
            return;
        }

        match &result.new {
            Some(new) => {
                if ttl_ms > 0 {
                    self.ttl.schedule(&result.key, new.created.add_ms(ttl_ms));
                } else {
                    self.ttl.cancel(&result.key);
                }
            }
            None => {
                self.ttl.cancel(&result.key);
            }
        }

        if let Some(event) =
            MapEvent::from_transition(&result.key, result.old.clone(), result.new.clone())
        {
            self.publish(event);
        }
    }

    fn publish(&mut self, event: MapEvent) {
        self.listeners.publish(&event);
    }

    fn handle_put(&mut self, key: &str, value: Bytes, ttl_ms: u64) -> Response {
        if let Some(rejection) = self.check_limits(key, Some(&value)) {
            return rejection;
        }
        let ttl_ms = match self.enforce_ttl(ttl_ms) {
            Ok(ttl_ms) => ttl_ms,
            Err(rejection) => return rejection,
        };
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self.store.put(key, value, ttl_ms, self.now);
        self.finish_write(&result, ttl_ms);
        Response::Update(result)
    }

    fn handle_put_if_absent(&mut self, key: &str, value: Bytes, ttl_ms: u64) -> Response {
        if let Some(rejection) = self.check_limits(key, Some(&value)) {
            return rejection;
        }
        let ttl_ms = match self.enforce_ttl(ttl_ms) {
            Ok(ttl_ms) => ttl_ms,
            Err(rejection) => return rejection,
        };
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self.store.put_if_absent(key, value, ttl_ms, self.now);
        self.finish_write(&result, ttl_ms);
        Response::Update(result)
    }

    fn handle_remove(&mut self, key: &str) -> Response {
        if let Some(rejection) = self.check_limits(key, None) {
            return rejection;
        }
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self.store.remove(key);
        self.finish_write(&result, 0);
        Response::Update(result)
    }

    fn handle_remove_value(&mut self, key: &str, expected: &Bytes) -> Response {
        if let Some(rejection) = self.check_limits(key, None) {
            return rejection;
        }
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self.store.remove_if_value(key, expected);
        self.finish_write(&result, 0);
        Response::Update(result)
    }

    fn handle_remove_version(&mut self, key: &str, expected: u64) -> Response {
        if let Some(rejection) = self.check_limits(key, None) {
            return rejection;
        }
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self.store.remove_if_version(key, expected);
        self.finish_write(&result, 0);
        Response::Update(result)
    }

    fn handle_replace(&mut self, key: &str, value: Bytes) -> Response {
        if let Some(rejection) = self.check_limits(key, Some(&value)) {
            return rejection;
        }
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self.store.replace(key, value, self.now);
        self.finish_write(&result, 0);
        Response::Update(result)
    }

    fn handle_replace_value(&mut self, key: &str, old_value: &Bytes, new_value: Bytes) -> Response {
        if let Some(rejection) = self.check_limits(key, Some(&new_value)) {
            return rejection;
        }
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self
            .store
            .replace_if_value(key, old_value, new_value, self.now);
        self.finish_write(&result, 0);
        Response::Update(result)
    }

    fn handle_replace_version(&mut self, key: &str, old_version: u64, new_value: Bytes) -> Response {
        if let Some(rejection) = self.check_limits(key, Some(&new_value)) {
            return rejection;
        }
        if self.locked(key) {
            return Response::Update(UpdateResult::write_lock(key, self.store.get(key)));
        }
        let result = self
            .store
            .replace_if_version(key, old_version, new_value, self.now);
        self.finish_write(&result, 0);
        Response::Update(result)
    }

    fn handle_clear(&mut self) -> Response {
        let skip = self.txns.locks().locked_keys();
        let removed = self.store.clear_except(&skip);
        for (key, old) in removed {
            self.ttl.cancel(&key);
            self.publish(MapEvent::removed(&key, old));
        }
        Response::Unit
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    fn handle_prepare_and_commit(&mut self, ctx: &CommandContext, log: TransactionLog) -> Response {
        let id = log.id.clone();
        let result = self.txns.prepare(log, ctx.session, &self.store);
        if result != PrepareResult::Ok {
            return Response::Prepare(result);
        }
        match self.txns.commit(&id) {
            Ok(staged) => {
                self.apply_staged(staged);
                Response::Prepare(PrepareResult::Ok)
            }
            // Unreachable after a successful prepare; surface as the
            // reserved code rather than panicking the replica.
            Err(_) => Response::Prepare(PrepareResult::PartialFailure),
        }
    }

    /// Apply a committed transaction's staged updates in log order.
    ///
    /// Each write draws one version from the counter, so a transaction's
    /// versions are contiguous. Staged writes carry no TTL: committed
    /// values persist until removed.
    fn apply_staged(&mut self, staged: Vec<StagedUpdate>) {
        for update in staged {
            match update {
                StagedUpdate::Put { key, value, .. } => {
                    let result = self.store.put(&key, value, 0, self.now);
                    self.finish_write(&result, 0);
                }
                StagedUpdate::Remove { key, .. } => {
                    let result = self.store.remove(&key);
                    self.finish_write(&result, 0);
                }
                StagedUpdate::Lock { .. } => {}
            }
        }
    }

    fn handle_session_expire(&mut self, session: u64) -> Response {
        let had_listener = self.listeners.remove(session);
        let gced = self.txns.expire_session(session);
        if had_listener || !gced.is_empty() {
            tracing::debug!(
                session,
                listener = had_listener,
                transactions = gced.len(),
                "session expired"
            );
        }
        Response::Unit
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Capture the complete replicated state.
    pub fn to_snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            version_counter: self.store.version_counter(),
            last_applied: self.last_applied,
            now: self.now,
            entries: self.store.to_records(),
            ttl: self.ttl.to_records(),
            transactions: self.txns.to_records(),
            listeners: self.listeners.to_records(),
        }
    }

    /// Rebuild a service from a snapshot.
    ///
    /// Fails fatally when the snapshot carries a transaction record in a
    /// terminal state; the replica must not serve from such an image.
    pub fn from_snapshot(snapshot: MapSnapshot, config: Config) -> KeystoneResult<Self> {
        let capacity = config.listener.queue_capacity;
        let service = Self {
            config,
            store: EntryStore::from_records(snapshot.entries, snapshot.version_counter),
            ttl: TtlIndex::from_records(snapshot.ttl),
            scheduler: EventScheduler::new(),
            txns: TransactionManager::from_records(snapshot.transactions)?,
            listeners: ListenerRegistry::from_records(snapshot.listeners, capacity),
            last_applied: snapshot.last_applied,
            now: snapshot.now,
        };
        tracing::debug!(
            last_applied = service.last_applied,
            entries = service.store.len(),
            "state restored from snapshot"
        );
        Ok(service)
    }
}

impl Default for MapService {
    fn default() -> Self {
        Self::with_defaults()
    }
}
