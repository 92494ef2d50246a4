//! Structural error types.
//!
//! Client-visible outcomes (precondition failures, lock conflicts,
//! transaction results) are encoded as status enums inside responses and
//! never surface as Rust errors — the consensus layer always receives a
//! well-formed response for a well-formed command. The errors here cover
//! the remaining cases: commands that cannot be decoded, snapshot images
//! that fail validation, and invariant violations that make the replica
//! unsafe to continue.

use thiserror::Error;

/// Errors raised by the map state machine and its codecs.
#[derive(Debug, Error)]
pub enum KeystoneError {
    /// Command or query bytes did not decode into a known operation, or
    /// an operation carried arguments outside configured limits. Rejected
    /// before any state change.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// A snapshot image failed structural validation. Fatal: the replica
    /// must not serve from a partially-restored state.
    #[error("snapshot corrupt: {reason}")]
    SnapshotCorrupt { reason: String },

    /// A transaction record was observed in a state the protocol cannot
    /// produce: terminal states are erased at the transition, never
    /// stored, so finding one (e.g. in a snapshot being restored) means
    /// the source replica corrupted the transaction lifecycle. Fatal.
    #[error("illegal transaction state: {id} is {state}")]
    IllegalTransactionState { id: String, state: String },

    /// An internal invariant did not hold. Fatal for the replica.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl KeystoneError {
    /// Create a snapshot corruption error.
    pub fn snapshot_corrupt(reason: impl Into<String>) -> Self {
        Self::SnapshotCorrupt {
            reason: reason.into(),
        }
    }

    /// Create a malformed-command error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedCommand(reason.into())
    }

    /// Create an illegal-transaction-state error.
    pub fn illegal_transaction_state(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self::IllegalTransactionState {
            id: id.into(),
            state: state.into(),
        }
    }

    /// Whether the error is fatal to the replica (as opposed to a
    /// per-request rejection).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SnapshotCorrupt { .. } | Self::IllegalTransactionState { .. } | Self::Internal(_)
        )
    }
}

/// Result type using [`KeystoneError`].
pub type KeystoneResult<T> = Result<T, KeystoneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(!KeystoneError::malformed("bad bytes").is_fatal());
        assert!(KeystoneError::snapshot_corrupt("bad magic").is_fatal());
        assert!(KeystoneError::illegal_transaction_state("t1", "committed").is_fatal());
        assert!(KeystoneError::Internal("version went backwards".into()).is_fatal());
    }

    #[test]
    fn display_messages() {
        let err = KeystoneError::malformed("trailing bytes");
        assert_eq!(err.to_string(), "malformed command: trailing bytes");

        let err = KeystoneError::snapshot_corrupt("checksum mismatch");
        assert_eq!(err.to_string(), "snapshot corrupt: checksum mismatch");
    }
}
