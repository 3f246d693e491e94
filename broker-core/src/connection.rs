//! Connection Registry: the set of live client sessions.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::frame::Frame;
use crate::subscription::SubscriptionHandle;

/// The broker-assigned outbound channel for a connection. A dedicated writer
/// task owns the socket's write half and drains this channel, so anything
/// holding a clone of the sender can deliver a frame without touching I/O
/// directly and without needing a lock to serialize writes.
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// One live client session's bookkeeping inside the registry.
///
/// `topics` and `queues` mirror exactly the destinations this connection is
/// subscribed to, keyed by destination name, so that `unregister` can find
/// every index entry that needs cleaning up without scanning the topic or
/// queue index.
pub struct ConnectionEntry {
    /// Monotonically-assigned, broker-lifetime-unique connection id.
    pub id: u64,
    /// Outbound frame channel for this connection.
    pub sender: FrameSender,
    /// This connection's topic subscriptions, by topic name.
    pub topics: HashMap<String, SubscriptionHandle>,
    /// This connection's queue subscriptions, by queue name.
    pub queues: HashMap<String, SubscriptionHandle>,
}

impl ConnectionEntry {
    /// Creates a fresh, subscription-less entry for a newly connected client.
    pub fn new(id: u64, sender: FrameSender) -> Self {
        Self {
            id,
            sender,
            topics: HashMap::new(),
            queues: HashMap::new(),
        }
    }
}

/// The set of live client sessions, keyed by connection id.
///
/// This is deliberately a thin map: the cross-index cleanup that
/// `unregister` requires (removing a departing connection from every topic
/// and queue it touched) needs simultaneous access to the topic and queue
/// indices, so that orchestration lives on `Dispatcher`/`BrokerState`
/// (see `dispatcher.rs`) rather than here.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<u64, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Adds a newly-connected client. Idempotent only in the sense that a
    /// duplicate id would overwrite the prior entry; ids are assigned by the
    /// caller and are broker-lifetime-unique, so this should never occur.
    pub fn insert(&mut self, entry: ConnectionEntry) {
        self.connections.insert(entry.id, entry);
    }

    /// Removes a connection's entry, returning it so the caller can use its
    /// `topics`/`queues` maps to clean up the topic and queue indices.
    ///
    /// Safe to call on an id that is not present (e.g. a connection that
    /// never completed its handshake): returns `None` and does nothing.
    pub fn remove(&mut self, id: u64) -> Option<ConnectionEntry> {
        self.connections.remove(&id)
    }

    /// Looks up a live connection's entry.
    pub fn get(&self, id: u64) -> Option<&ConnectionEntry> {
        self.connections.get(&id)
    }

    /// Mutable lookup, used when a subscribe/unsubscribe needs to update a
    /// connection's local topic/queue maps.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut ConnectionEntry> {
        self.connections.get_mut(&id)
    }

    /// True iff `id` is currently registered — used by the invariant checks
    /// in the test suite (no index may reference a connection absent here).
    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove_round_trips() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        registry.insert(ConnectionEntry::new(1, tx));
        assert!(registry.contains(1));
        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert!(!registry.contains(1));
    }

    #[test]
    fn remove_on_unknown_id_returns_none() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.remove(42).is_none());
    }
}
