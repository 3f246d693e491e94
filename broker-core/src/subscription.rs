//! A single consumer's binding to one destination on one connection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::message::Destination;

/// Default prefetch for a freshly-created subscription, per the wire
/// contract: ten messages may be outstanding before the broker stops
/// sending to it.
pub const DEFAULT_PREFETCH: u32 = 10;

/// A subscription's mutable state.
///
/// Shared by reference between a connection's local `topics`/`queues` map
/// and, for queues, the listener group's `ready`/`blocked` sets — never
/// duplicated, so that a pending-ack mutation made through one path is
/// immediately visible through the other.
#[derive(Debug)]
pub struct Subscription {
    /// The destination this subscription is bound to.
    pub destination: Destination,
    /// The maximum number of unacknowledged messages this subscription may
    /// hold before it is moved from `ready` to `blocked`.
    pub prefetch: u32,
    /// Ids of messages sent to this subscription and not yet acknowledged.
    pub pending_acks: HashSet<String>,
}

impl Subscription {
    /// Creates a fresh subscription record with empty pending acks.
    pub fn new(destination: Destination, prefetch: u32) -> SubscriptionHandle {
        Arc::new(Mutex::new(Subscription {
            destination,
            prefetch,
            pending_acks: HashSet::new(),
        }))
    }

    /// True once this subscription has reached its prefetch limit.
    pub fn is_blocked(&self) -> bool {
        self.pending_acks.len() as u32 >= self.prefetch
    }
}

/// Shared handle to a [`Subscription`]; see the module docs for why this is
/// reference-counted rather than owned uniquely by one map.
pub type SubscriptionHandle = Arc<Mutex<Subscription>>;
