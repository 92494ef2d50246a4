//! Listener registry and per-session event queues.
//!
//! Sessions subscribe to change events; the registry queues matching
//! events per session in command application order, and the surrounding
//! session layer drains each queue for delivery. The registry never owns
//! session lifetime — it reacts to explicit subscribe/unsubscribe
//! commands and to session-expire commands from the session layer.
//!
//! Queues are bounded. When a queue is full the newest events are
//! dropped and counted; the loss is surfaced to the consumer as a
//! synthetic [`ListenerEvent::Lagged`] item at the head of the next
//! drain, never as a command error.

use crate::map::events::{EventKind, MapEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

bitflags::bitflags! {
    /// Event filters for a subscription. Empty means deliver everything.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ListenerFilters: u32 {
        /// Suppress INSERT events.
        const NO_INSERT = 0b0000_0001;
        /// Suppress UPDATE events.
        const NO_UPDATE = 0b0000_0010;
        /// Suppress REMOVE events.
        const NO_REMOVE = 0b0000_0100;
    }
}

impl Default for ListenerFilters {
    fn default() -> Self {
        Self::empty()
    }
}

impl ListenerFilters {
    /// Whether events of `kind` pass this filter.
    pub fn accepts(&self, kind: EventKind) -> bool {
        let suppressed = match kind {
            EventKind::Insert => Self::NO_INSERT,
            EventKind::Update => Self::NO_UPDATE,
            EventKind::Remove => Self::NO_REMOVE,
        };
        !self.contains(suppressed)
    }
}

/// An item drained from a session queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The queue overflowed since the last drain; `dropped` events were
    /// discarded.
    Lagged { dropped: u64 },
    /// A queued change event.
    Event(MapEvent),
}

/// A serializable subscription record for snapshots.
///
/// Queued-but-undelivered events are delivery state, not replicated
/// state; only the subscription itself survives a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRecord {
    /// Subscribed session.
    pub session: u64,
    /// The session's event filters.
    pub filters: ListenerFilters,
}

#[derive(Debug)]
struct SessionQueue {
    filters: ListenerFilters,
    events: VecDeque<MapEvent>,
    dropped: u64,
}

/// Listener registry statistics.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistryStats {
    /// Subscribed sessions.
    pub sessions: usize,
    /// Events currently queued across all sessions.
    pub queued: usize,
    /// Events dropped to overflow since startup.
    pub dropped: u64,
}

/// Tracks subscribed sessions and their queued events.
#[derive(Debug)]
pub struct ListenerRegistry {
    sessions: BTreeMap<u64, SessionQueue>,
    capacity: usize,
    total_dropped: u64,
}

impl ListenerRegistry {
    /// Create a registry with the given per-session queue capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            capacity,
            total_dropped: 0,
        }
    }

    /// Per-session queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe a session. Re-subscribing replaces the filters and keeps
    /// any queued events.
    pub fn add(&mut self, session: u64, filters: ListenerFilters) {
        self.sessions
            .entry(session)
            .and_modify(|q| q.filters = filters)
            .or_insert_with(|| SessionQueue {
                filters,
                events: VecDeque::new(),
                dropped: 0,
            });
    }

    /// Unsubscribe a session, dropping its queue. Returns whether the
    /// session was subscribed.
    pub fn remove(&mut self, session: u64) -> bool {
        self.sessions.remove(&session).is_some()
    }

    /// Whether a session is subscribed.
    pub fn is_subscribed(&self, session: u64) -> bool {
        self.sessions.contains_key(&session)
    }

    /// Queue an event for every subscribed session whose filters accept
    /// it.
    pub fn publish(&mut self, event: &MapEvent) {
        for queue in self.sessions.values_mut() {
            if !queue.filters.accepts(event.kind) {
                continue;
            }
            if queue.events.len() >= self.capacity {
                queue.dropped += 1;
                self.total_dropped += 1;
            } else {
                queue.events.push_back(event.clone());
            }
        }
    }

    /// Drain a session's queue.
    ///
    /// If the queue overflowed since the last drain, the first item is a
    /// [`ListenerEvent::Lagged`] marker carrying the drop count.
    pub fn drain(&mut self, session: u64) -> Vec<ListenerEvent> {
        let Some(queue) = self.sessions.get_mut(&session) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(queue.events.len() + 1);
        if queue.dropped > 0 {
            out.push(ListenerEvent::Lagged {
                dropped: queue.dropped,
            });
            queue.dropped = 0;
        }
        out.extend(queue.events.drain(..).map(ListenerEvent::Event));
        out
    }

    /// Number of events queued for a session.
    pub fn pending(&self, session: u64) -> usize {
        self.sessions
            .get(&session)
            .map(|q| q.events.len())
            .unwrap_or(0)
    }

    /// Subscribed sessions in ascending id order.
    pub fn session_ids(&self) -> Vec<u64> {
        self.sessions.keys().copied().collect()
    }

    /// Subscriptions as snapshot records, in session order.
    pub fn to_records(&self) -> Vec<ListenerRecord> {
        self.sessions
            .iter()
            .map(|(session, queue)| ListenerRecord {
                session: *session,
                filters: queue.filters,
            })
            .collect()
    }

    /// Rebuild a registry from snapshot records.
    pub fn from_records(records: Vec<ListenerRecord>, capacity: usize) -> Self {
        let mut registry = Self::new(capacity);
        for record in records {
            registry.add(record.session, record.filters);
        }
        registry
    }

    /// Registry statistics.
    pub fn stats(&self) -> ListenerRegistryStats {
        ListenerRegistryStats {
            sessions: self.sessions.len(),
            queued: self.sessions.values().map(|q| q.events.len()).sum(),
            dropped: self.total_dropped,
        }
    }
}
