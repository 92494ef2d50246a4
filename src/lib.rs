//! Keystone - replicated, versioned, transactional key-value map.
//!
//! Keystone is the deterministic state-machine core of a consistent map
//! primitive: a consensus layer (Raft or equivalent) replicates an
//! ordered stream of commands, and every replica applies that stream to
//! an identical copy of the structures in this crate. Each key maps to
//! an opaque byte value with a monotone version and an optional TTL;
//! cross-key atomicity comes from an optimistic two-phase-commit
//! transaction protocol; subscribed sessions receive an ordered stream
//! of change events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Consensus Layer                           │
//! │     log replication │ leader election │ session tracking        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │  (log_index, timestamp,
//!                                 │   session, command bytes)
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Command / Query Codec                      │
//! │            total decoding │ malformed-command rejection         │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Map State Machine                       │
//! │  Entry Store │ TTL Index │ Transactions │ Locks │ Listeners     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Snapshot Codec                           │
//! │        deterministic sectioned image for log compaction         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Structural error types
//! - [`core::time`] - Deterministic logical time
//!
//! ## Map
//! - [`map::store`] - Entry store and version counter
//! - [`map::ttl`] - Ordered TTL index
//! - [`map::scheduler`] - Deterministic expiration sweep
//! - [`map::txn`] - Optimistic two-phase-commit transactions
//! - [`map::listener`] - Listener registry and per-session queues
//! - [`map::ops`] - Operation and response variants
//! - [`map::service`] - The dispatching state machine
//!
//! ## Codec
//! - [`codec::command`] - Byte codec for operations and responses
//! - [`codec::snapshot`] - Deterministic sectioned snapshot format
//!
//! ## CLI
//! - [`cli::commands`] - Operator tooling
//!
//! # Key Invariants
//!
//! - Versions are strictly increasing per key; the global counter issues
//!   one version per effective mutation
//! - Replicas applying the same command prefix hold byte-identical state
//!   and produce byte-identical snapshots
//! - TTL expiry fires before the first command at or past the deadline,
//!   in ascending `(expiry, key)` order
//! - While a key is write-locked by a prepared transaction, no other
//!   mutation of that key succeeds

// Core infrastructure
pub mod core;

// The map state machine
pub mod map;

// Wire and snapshot codecs
pub mod codec;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, time};
pub use map::{events, listener, ops, scheduler, service, store, ttl, txn, versioned};
