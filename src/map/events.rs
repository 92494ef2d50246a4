//! Change notification events.
//!
//! Every effective mutation produces exactly one event. Events are queued
//! per listening session by the [`listener`](super::listener) registry in
//! command application order.

use super::versioned::Versioned;
use serde::{Deserialize, Serialize};

/// The kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A key that was absent received a value.
    Insert,
    /// A present key received a new value.
    Update,
    /// A present key was removed (explicitly, by `clear`, by TTL expiry,
    /// or by a committed transactional remove).
    Remove,
}

/// A single change to one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEvent {
    /// What happened.
    pub kind: EventKind,

    /// The affected key.
    pub key: String,

    /// Value before the change, if the key was present.
    pub old: Option<Versioned>,

    /// Value after the change, if the key is present.
    pub new: Option<Versioned>,
}

impl MapEvent {
    /// Event for a key that came into existence.
    pub fn inserted(key: impl Into<String>, new: Versioned) -> Self {
        Self {
            kind: EventKind::Insert,
            key: key.into(),
            old: None,
            new: Some(new),
        }
    }

    /// Event for a key whose value was replaced.
    pub fn updated(key: impl Into<String>, old: Versioned, new: Versioned) -> Self {
        Self {
            kind: EventKind::Update,
            key: key.into(),
            old: Some(old),
            new: Some(new),
        }
    }

    /// Event for a key that was removed.
    pub fn removed(key: impl Into<String>, old: Versioned) -> Self {
        Self {
            kind: EventKind::Remove,
            key: key.into(),
            old: Some(old),
            new: None,
        }
    }

    /// Build the event implied by an old/new pair, if any change happened.
    ///
    /// Returns `None` for the no-change pair (both absent).
    pub fn from_transition(
        key: &str,
        old: Option<Versioned>,
        new: Option<Versioned>,
    ) -> Option<Self> {
        match (old, new) {
            (None, Some(new)) => Some(Self::inserted(key, new)),
            (Some(old), Some(new)) => Some(Self::updated(key, old, new)),
            (Some(old), None) => Some(Self::removed(key, old)),
            (None, None) => None,
        }
    }
}
