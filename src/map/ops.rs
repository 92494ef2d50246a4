//! Operation and response variants.
//!
//! Every request the consensus layer can route is one variant of
//! [`Operation`], and [`Operation::kind`] classifies it as a command
//! (replicated through the log) or a query (servable from applied
//! state). The dispatcher in [`service`](super::service) is an
//! exhaustive match over these variants, so adding an operation without
//! routing it is a compile error.

use crate::map::store::UpdateResult;
use crate::map::txn::{
    CommitResult, PrepareResult, RollbackResult, TransactionId, TransactionLog,
};
use crate::map::versioned::Versioned;
use crate::map::listener::ListenerFilters;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing classification for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Mutates state; must be replicated through the consensus log.
    Command,
    /// Reads applied state; may be served at a weaker consistency.
    Query,
}

/// A request against the map state machine.
///
/// TTL-less put variants are the `ttl_ms: 0` case of their TTL-carrying
/// counterparts, so one variant covers both named operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------
    /// Number of entries.
    Size,
    /// Whether the map has no entries.
    IsEmpty,
    /// Whether a key is present.
    ContainsKey { key: String },
    /// Whether any entry holds exactly these bytes.
    ContainsValue { value: Bytes },
    /// The versioned value of a key.
    Get { key: String },
    /// The present subset of the given keys.
    GetAllPresent { keys: Vec<String> },
    /// The versioned value of a key, or a zero-version default.
    GetOrDefault { key: String, default: Bytes },
    /// Snapshot of all keys.
    KeySet,
    /// Snapshot of all values.
    Values,
    /// Snapshot of all entries.
    EntrySet,
    /// Register a transaction and return its start version.
    Begin { id: TransactionId },

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------
    /// Unconditional write.
    Put {
        key: String,
        value: Bytes,
        ttl_ms: u64,
    },
    /// Write only when absent.
    PutIfAbsent {
        key: String,
        value: Bytes,
        ttl_ms: u64,
    },
    /// Unconditional write returning the new value.
    PutAndGet {
        key: String,
        value: Bytes,
        ttl_ms: u64,
    },
    /// Unconditional removal.
    Remove { key: String },
    /// Remove only when the current value matches.
    RemoveValue { key: String, value: Bytes },
    /// Remove only when the current version matches.
    RemoveVersion { key: String, version: u64 },
    /// Replace the value of a present key.
    Replace { key: String, value: Bytes },
    /// Replace only when the current value matches.
    ReplaceValue {
        key: String,
        old_value: Bytes,
        new_value: Bytes,
    },
    /// Replace only when the current version matches.
    ReplaceVersion {
        key: String,
        old_version: u64,
        new_value: Bytes,
    },
    /// Remove every entry.
    Clear,
    /// Subscribe the issuing session to change events.
    AddListener { filters: ListenerFilters },
    /// Unsubscribe the issuing session.
    RemoveListener,
    /// Validate and stage a transaction.
    Prepare { log: TransactionLog },
    /// Single-shot prepare + commit.
    PrepareAndCommit { log: TransactionLog },
    /// Apply a prepared transaction.
    Commit { id: TransactionId },
    /// Discard a transaction.
    Rollback { id: TransactionId },
    /// Session-layer notification that a session closed.
    SessionExpire { session: u64 },
}

impl Operation {
    /// Classify the operation for consensus routing.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Size
            | Self::IsEmpty
            | Self::ContainsKey { .. }
            | Self::ContainsValue { .. }
            | Self::Get { .. }
            | Self::GetAllPresent { .. }
            | Self::GetOrDefault { .. }
            | Self::KeySet
            | Self::Values
            | Self::EntrySet
            | Self::Begin { .. } => OperationKind::Query,

            Self::Put { .. }
            | Self::PutIfAbsent { .. }
            | Self::PutAndGet { .. }
            | Self::Remove { .. }
            | Self::RemoveValue { .. }
            | Self::RemoveVersion { .. }
            | Self::Replace { .. }
            | Self::ReplaceValue { .. }
            | Self::ReplaceVersion { .. }
            | Self::Clear
            | Self::AddListener { .. }
            | Self::RemoveListener
            | Self::Prepare { .. }
            | Self::PrepareAndCommit { .. }
            | Self::Commit { .. }
            | Self::Rollback { .. }
            | Self::SessionExpire { .. } => OperationKind::Command,
        }
    }

    /// Stable operation name, for logs and traces.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::IsEmpty => "isEmpty",
            Self::ContainsKey { .. } => "containsKey",
            Self::ContainsValue { .. } => "containsValue",
            Self::Get { .. } => "get",
            Self::GetAllPresent { .. } => "getAllPresent",
            Self::GetOrDefault { .. } => "getOrDefault",
            Self::KeySet => "keySet",
            Self::Values => "values",
            Self::EntrySet => "entrySet",
            Self::Begin { .. } => "begin",
            Self::Put { .. } => "put",
            Self::PutIfAbsent { .. } => "putIfAbsent",
            Self::PutAndGet { .. } => "putAndGet",
            Self::Remove { .. } => "remove",
            Self::RemoveValue { .. } => "removeValue",
            Self::RemoveVersion { .. } => "removeVersion",
            Self::Replace { .. } => "replace",
            Self::ReplaceValue { .. } => "replaceValue",
            Self::ReplaceVersion { .. } => "replaceVersion",
            Self::Clear => "clear",
            Self::AddListener { .. } => "addListener",
            Self::RemoveListener => "removeListener",
            Self::Prepare { .. } => "prepare",
            Self::PrepareAndCommit { .. } => "prepareAndCommit",
            Self::Commit { .. } => "commit",
            Self::Rollback { .. } => "rollback",
            Self::SessionExpire { .. } => "sessionExpire",
        }
    }
}

/// A rejection encoded inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseError {
    /// The request could not be decoded or failed input validation.
    MalformedCommand { reason: String },
    /// The replica has not applied far enough to satisfy the query's
    /// consistency fence.
    ReadNotReady { applied: u64, required: u64 },
}

/// The result of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Operation with no return value.
    Unit,
    /// Entry count.
    Size(u64),
    /// Boolean result.
    Flag(bool),
    /// Optional versioned value.
    Value(Option<Versioned>),
    /// Key → versioned value mapping.
    ValueMap(BTreeMap<String, Versioned>),
    /// Key snapshot.
    Keys(Vec<String>),
    /// Value snapshot.
    Values(Vec<Versioned>),
    /// Entry snapshot.
    Entries(Vec<(String, Versioned)>),
    /// Mutation result.
    Update(UpdateResult),
    /// Start version from `begin`.
    BeginVersion(u64),
    /// Prepare outcome.
    Prepare(PrepareResult),
    /// Commit outcome.
    Commit(CommitResult),
    /// Rollback outcome.
    Rollback(RollbackResult),
    /// Encoded rejection.
    Error(ResponseError),
}

impl Response {
    /// Build a malformed-command rejection.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Error(ResponseError::MalformedCommand {
            reason: reason.into(),
        })
    }

    /// Whether this response is a rejection.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_a_query_and_session_expire_a_command() {
        let begin = Operation::Begin {
            id: TransactionId::from("t1"),
        };
        assert_eq!(begin.kind(), OperationKind::Query);

        let expire = Operation::SessionExpire { session: 4 };
        assert_eq!(expire.kind(), OperationKind::Command);
    }

    #[test]
    fn names_match_the_operation_table() {
        assert_eq!(Operation::KeySet.name(), "keySet");
        assert_eq!(
            Operation::PutIfAbsent {
                key: "k".into(),
                value: Bytes::new(),
                ttl_ms: 0
            }
            .name(),
            "putIfAbsent"
        );
    }
}
