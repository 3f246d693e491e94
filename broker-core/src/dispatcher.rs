//! The Dispatcher: `publish`, `subscribe`, `unsubscribe`, and `disconnect` —
//! the public entry points the command dispatch table drives.
//!
//! All broker state (the connection registry, topic index, and queue
//! index) lives behind one `tokio::sync::Mutex`, held for the entire
//! duration of whichever of the four operations above is in flight,
//! including any persistence I/O it performs. This is how a crate running
//! on the ordinary multi-task `tokio` runtime reproduces the atomicity
//! guarantees of the single-threaded cooperative model the dispatch
//! algorithm is specified against: each of the four operations corresponds
//! to exactly one atomic state transition in that model, so serializing
//! them wholesale is sufficient and no finer-grained locking is needed at
//! the scale this broker targets.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::{ConnectionEntry, ConnectionRegistry, FrameSender};
use crate::error::BrokerError;
use crate::frame::Frame;
use crate::message::{Message, MessageIdGenerator};
use crate::message::Destination;
use crate::persistence::PersistenceStore;
use crate::queue_index::QueueIndex;
use crate::subscription::Subscription;
use crate::topic_index::TopicIndex;

struct BrokerState {
    connections: ConnectionRegistry,
    topics: TopicIndex,
    queues: QueueIndex,
    next_conn_id: u64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            topics: TopicIndex::new(),
            queues: QueueIndex::new(),
            next_conn_id: 1,
        }
    }

    /// Connection Registry's `unregister`: removes `conn_id` from every
    /// topic and queue it appears in, then drops its registry entry.
    /// Idempotent — a second call on an already-removed id is a no-op.
    fn unregister_connection(&mut self, conn_id: u64) {
        if let Some(entry) = self.connections.remove(conn_id) {
            for topic in entry.topics.keys() {
                self.topics.remove(topic, conn_id);
            }
            for queue in entry.queues.keys() {
                self.queues.detach(queue, conn_id);
            }
        }
    }
}

/// The destination dispatch engine: connection registry, topic index, and
/// queue index, plus the persistence adapter they spill to and replay from.
pub struct Dispatcher {
    state: Mutex<BrokerState>,
    persistence: Arc<dyn PersistenceStore>,
    id_gen: MessageIdGenerator,
}

impl Dispatcher {
    /// Creates a dispatcher backed by the given persistence adapter.
    pub fn new(persistence: Arc<dyn PersistenceStore>) -> Self {
        Self {
            state: Mutex::new(BrokerState::new()),
            persistence,
            id_gen: MessageIdGenerator::new(),
        }
    }

    /// Mints a broker-local message id, unique for the broker's lifetime.
    pub fn next_message_id(&self) -> String {
        self.id_gen.next_id()
    }

    /// Sends a frame directly to one connection's outbound channel. Used by
    /// the command dispatch table for CONNECTED/RECEIPT/ERROR replies,
    /// which are not themselves part of the dispatch algorithm. A no-op if
    /// the connection has already disconnected.
    pub async fn send_frame(&self, conn_id: u64, frame: Frame) {
        let state = self.state.lock().await;
        if let Some(conn) = state.connections.get(conn_id) {
            let _ = conn.sender.send(frame);
        }
    }

    /// Registers a newly-connected client and returns its broker-assigned
    /// connection id.
    pub async fn connect(&self, sender: FrameSender) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_conn_id;
        state.next_conn_id += 1;
        state.connections.insert(ConnectionEntry::new(id, sender));
        tracing::info!(conn_id = id, "connection registered");
        id
    }

    /// Tears down a connection: removes it from every topic and queue it
    /// was subscribed to. Safe to call more than once for the same id.
    pub async fn disconnect(&self, conn_id: u64) {
        let mut state = self.state.lock().await;
        state.unregister_connection(conn_id);
        tracing::info!(conn_id, "connection unregistered");
    }

    /// SUBSCRIBE: binds `conn_id` to `destination`, replacing any prior
    /// subscription this connection held on it. For queues, also replays
    /// persisted messages up to the fresh subscription's prefetch.
    pub async fn subscribe(&self, conn_id: u64, destination: Destination) -> Result<(), BrokerError> {
        match destination.clone() {
            Destination::Topic(name) => {
                let sub = Subscription::new(destination, crate::subscription::DEFAULT_PREFETCH);
                let mut state = self.state.lock().await;
                if let Some(conn) = state.connections.get_mut(conn_id) {
                    conn.topics.insert(name.clone(), sub);
                }
                state.topics.add(&name, conn_id);
                tracing::info!(conn_id, topic = %name, "subscribed");
                Ok(())
            }
            Destination::Queue(name) => {
                let sub = Subscription::new(destination.clone(), crate::subscription::DEFAULT_PREFETCH);
                {
                    let mut state = self.state.lock().await;
                    if let Some(conn) = state.connections.get_mut(conn_id) {
                        conn.queues.insert(name.clone(), sub.clone());
                    }
                    state.queues.attach(&name, conn_id, sub.clone());
                }
                tracing::info!(conn_id, queue = %name, "subscribed");
                self.replay(conn_id, &name, &destination, &sub).await
            }
        }
    }

    /// Replays up to `prefetch - |pending_acks|` persisted messages for a
    /// freshly-subscribed queue consumer, transmitting them serially and in
    /// persistence order (priority ascending, then timestamp ascending).
    async fn replay(
        &self,
        conn_id: u64,
        queue: &str,
        destination: &Destination,
        sub: &crate::subscription::SubscriptionHandle,
    ) -> Result<(), BrokerError> {
        let to_fetch = {
            let s = sub.lock().expect("subscription lock poisoned");
            s.prefetch.saturating_sub(s.pending_acks.len() as u32)
        };
        if to_fetch == 0 {
            return Ok(());
        }

        let rows = self
            .persistence
            .fetch_messages_for_destination(queue, to_fetch)
            .await
            .map_err(|e| BrokerError::Persistence(e.to_string()))?;

        for row in rows {
            {
                let mut s = sub.lock().expect("subscription lock poisoned");
                s.pending_acks.insert(row.id.clone());
            }
            let frame = Frame::message(&row.id, &destination.to_wire(), row.body);
            let state = self.state.lock().await;
            if let Some(conn) = state.connections.get(conn_id) {
                let _ = conn.sender.send(frame);
            }
        }

        let mut state = self.state.lock().await;
        state.queues.refresh_block_state(queue, conn_id);
        tracing::debug!(conn_id, queue, "replayed persisted messages");
        Ok(())
    }

    /// UNSUBSCRIBE: removes `conn_id` from `destination`'s index entry. A
    /// no-op when the destination is unknown to this connection.
    pub async fn unsubscribe(&self, conn_id: u64, destination: &Destination) {
        let mut state = self.state.lock().await;
        match destination {
            Destination::Topic(name) => {
                state.topics.remove(name, conn_id);
                tracing::info!(conn_id, topic = %name, "unsubscribed");
            }
            Destination::Queue(name) => {
                state.queues.detach(name, conn_id);
                tracing::info!(conn_id, queue = %name, "unsubscribed");
            }
        }
    }

    /// Publishes `message` to its destination: fan-out for a topic, or the
    /// round-robin dispatch algorithm (falling back to persistence) for a
    /// queue.
    pub async fn publish(&self, message: Message) -> Result<(), BrokerError> {
        match message.destination.clone() {
            Destination::Topic(name) => {
                let state = self.state.lock().await;
                let members: Vec<u64> = state.topics.members(&name).collect();
                let frame = Frame::message(&message.id, &message.destination.to_wire(), message.body.clone());
                for conn_id in &members {
                    if let Some(conn) = state.connections.get(*conn_id) {
                        // Fan-out is fire-and-forget: an individual send
                        // failure (a disconnected client) must not abort
                        // delivery to the rest.
                        let _ = conn.sender.send(frame.clone());
                    }
                }
                tracing::debug!(topic = %name, subscribers = members.len(), "fan-out publish");
                Ok(())
            }
            Destination::Queue(name) => {
                let mut state = self.state.lock().await;
                if !state.queues.contains(&name) {
                    drop(state);
                    tracing::debug!(queue = %name, "no listener group, persisting");
                    return self
                        .persistence
                        .insert_message(&message)
                        .await
                        .map_err(|e| BrokerError::Persistence(e.to_string()));
                }

                match state.queues.select_next(&name) {
                    Some((conn_id, sub)) => {
                        {
                            let mut s = sub.lock().expect("subscription lock poisoned");
                            s.pending_acks.insert(message.id.clone());
                        }
                        state.queues.mark_sent(&name, conn_id);
                        let frame =
                            Frame::message(&message.id, &message.destination.to_wire(), message.body.clone());
                        if let Some(conn) = state.connections.get(conn_id) {
                            let _ = conn.sender.send(frame);
                        }
                        tracing::debug!(queue = %name, conn_id, "dispatched to queue subscriber");
                        Ok(())
                    }
                    None => {
                        // The group exists but, unexpectedly, has no
                        // selectable member (should not occur: a present
                        // group always has at least one member). Treat
                        // conservatively as a persistence fallback.
                        drop(state);
                        tracing::warn!(queue = %name, "listener group present but empty selection, persisting");
                        self.persistence
                            .insert_message(&message)
                            .await
                            .map_err(|e| BrokerError::Persistence(e.to_string()))
                    }
                }
            }
        }
    }
}
