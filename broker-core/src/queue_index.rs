//! Queue Index: per-queue listener groups, the round-robin cursor, and the
//! prefetch-driven ready/blocked state machine. This is the dispatch
//! engine's hardest component — see `dispatcher.rs` for how it is wired
//! together with the persistence fallback.

use std::cmp::Reverse;
use std::collections::{BTreeMap, Bound, HashMap};

use crate::subscription::SubscriptionHandle;

/// Per-queue bookkeeping: which subscriptions may receive the next message
/// (`ready`), which have exhausted their prefetch (`blocked`), and a cursor
/// (`last_sent`) identifying whoever received the previous message.
///
/// Both sets are keyed by `Reverse(connection id)` so that iterating the
/// map in its natural (ascending) order visits connections in descending id
/// order, matching the comparator the source round-robin is defined against.
pub struct ListenerGroup {
    ready: BTreeMap<Reverse<u64>, SubscriptionHandle>,
    blocked: BTreeMap<Reverse<u64>, SubscriptionHandle>,
    last_sent: Option<u64>,
}

impl ListenerGroup {
    fn new() -> Self {
        Self {
            ready: BTreeMap::new(),
            blocked: BTreeMap::new(),
            last_sent: None,
        }
    }

    /// Inserts a pair into `ready`. Used both to create a group's first
    /// member and to add later subscribers to an existing group.
    fn attach(&mut self, conn_id: u64, sub: SubscriptionHandle) {
        self.ready.insert(Reverse(conn_id), sub);
    }

    /// Removes any pair keyed by `conn_id` from both `ready` and `blocked`.
    /// A stale `last_sent` pointing at the removed connection is left in
    /// place deliberately; per the cursor-correctness design note it is
    /// re-validated (and falls back to `min(ready)`) the next time it is
    /// used, not eagerly repaired here.
    fn detach(&mut self, conn_id: u64) {
        self.ready.remove(&Reverse(conn_id));
        self.blocked.remove(&Reverse(conn_id));
    }

    /// True once both sets are empty — the caller drops the group at this
    /// point so queue bookkeeping does not grow unbounded.
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.blocked.is_empty()
    }

    /// The subscription handle for `conn_id`, wherever it currently sits.
    pub fn subscription_of(&self, conn_id: u64) -> Option<SubscriptionHandle> {
        self.ready
            .get(&Reverse(conn_id))
            .or_else(|| self.blocked.get(&Reverse(conn_id)))
            .cloned()
    }

    /// `min(ready)` under the group's order: the member with the largest
    /// connection id, since the order is descending by id.
    fn min_ready(&self) -> Option<u64> {
        self.ready.keys().next().map(|r| r.0)
    }

    /// The successor of `last` within `ready` alone, wrapping to
    /// `min(ready)` when `last` has no successor (it was the last member in
    /// the order, or was not itself a ready member at all).
    fn ready_successor(&self, last: u64) -> Option<u64> {
        if self.ready.is_empty() {
            return None;
        }
        self.ready
            .range((Bound::Excluded(Reverse(last)), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.0)
            .or_else(|| self.min_ready())
    }

    /// The successor of `last` across the *union* of `ready` and `blocked`.
    /// Used only when every member is blocked but the group still exists —
    /// see the dispatch-when-all-blocked resolution in the design notes.
    fn full_successor(&self, last: u64) -> Option<u64> {
        if self.ready.is_empty() && self.blocked.is_empty() {
            return None;
        }
        let mut all: std::collections::BTreeSet<Reverse<u64>> =
            self.ready.keys().copied().collect();
        all.extend(self.blocked.keys().copied());
        all.range((Bound::Excluded(Reverse(last)), Bound::Unbounded))
            .next()
            .map(|k| k.0)
            .or_else(|| all.iter().next().map(|k| k.0))
    }

    /// Moves every blocked pair whose subscription has fallen back under
    /// its prefetch limit into `ready`. A subscription only leaves
    /// `blocked` this way or by being re-created wholesale by a fresh
    /// SUBSCRIBE (see the ACK-processing design note: nothing here ever
    /// clears a `pending_acks` entry).
    fn unblock_sweep(&mut self) {
        let newly_ready: Vec<Reverse<u64>> = self
            .blocked
            .iter()
            .filter(|(_, sub)| {
                let s = sub.lock().expect("subscription lock poisoned");
                !s.is_blocked()
            })
            .map(|(k, _)| *k)
            .collect();
        for key in newly_ready {
            if let Some(sub) = self.blocked.remove(&key) {
                self.ready.insert(key, sub);
            }
        }
    }

    /// Runs steps 1-2 of the dispatch algorithm: picks the next connection
    /// id that should receive the in-flight message, running an
    /// unblock-sweep wherever the algorithm calls for one. Returns `None`
    /// only when the group has no ready member even after a sweep *and* the
    /// caller is expected to have already excluded the "no listener group
    /// at all" case (which is handled one level up, in the queue index).
    fn select_next(&mut self) -> Option<u64> {
        match self.last_sent {
            None => self.min_ready(),
            Some(last) => {
                if self.ready.is_empty() {
                    self.unblock_sweep();
                }
                if self.ready.is_empty() {
                    // Every member is blocked, but the group is present: the
                    // source still delivers to the cursor's successor rather
                    // than spilling to persistence (see design notes, open
                    // question 3).
                    return self.full_successor(last);
                }
                let mut candidate = self.ready_successor(last);
                if candidate == self.min_ready() {
                    // The cursor wrapped through the entire ready set.
                    self.unblock_sweep();
                    candidate = self.ready_successor(last);
                }
                candidate
            }
        }
    }

    /// Step 3 of the dispatch algorithm: records that `conn_id` just
    /// received a message, advances the cursor, and moves the pair from
    /// `ready` to `blocked` if its prefetch is now exhausted. Assumes the
    /// caller has already added the message id to the subscription's
    /// `pending_acks`.
    fn mark_sent(&mut self, conn_id: u64) {
        self.last_sent = Some(conn_id);
        self.refresh_block_state(conn_id);
    }

    /// Moves `conn_id` from `ready` to `blocked` if its subscription has
    /// reached prefetch capacity, without touching the cursor. Used after
    /// SUBSCRIBE replay, where messages are added to `pending_acks` outside
    /// of the normal dispatch path.
    fn refresh_block_state(&mut self, conn_id: u64) {
        let key = Reverse(conn_id);
        if let Some(sub) = self.ready.get(&key) {
            let now_blocked = sub.lock().expect("subscription lock poisoned").is_blocked();
            if now_blocked {
                if let Some(sub) = self.ready.remove(&key) {
                    self.blocked.insert(key, sub);
                }
            }
        }
    }
}

/// For each queue name, its listener group. Entries are created on first
/// `attach` and removed once their group empties.
#[derive(Default)]
pub struct QueueIndex {
    groups: HashMap<String, ListenerGroup>,
}

impl QueueIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    /// True iff `queue` currently has a listener group at all (regardless
    /// of whether its members are ready or blocked).
    pub fn contains(&self, queue: &str) -> bool {
        self.groups.contains_key(queue)
    }

    /// Attaches `(conn_id, sub)` to `queue`'s group, creating the group if
    /// this is its first member.
    pub fn attach(&mut self, queue: &str, conn_id: u64, sub: SubscriptionHandle) {
        self.groups
            .entry(queue.to_string())
            .or_insert_with(ListenerGroup::new)
            .attach(conn_id, sub);
    }

    /// Detaches `conn_id` from `queue`'s group, dropping the group if it is
    /// now empty. A no-op if the queue or the member is unknown.
    pub fn detach(&mut self, queue: &str, conn_id: u64) {
        if let Some(group) = self.groups.get_mut(queue) {
            group.detach(conn_id);
            if group.is_empty() {
                self.groups.remove(queue);
            }
        }
    }

    /// Detaches `conn_id` from every queue it belongs to, dropping any
    /// group that empties as a result. Used by connection teardown.
    pub fn remove_from_all(&mut self, conn_id: u64) {
        self.groups.retain(|_, group| {
            group.detach(conn_id);
            !group.is_empty()
        });
    }

    /// The group for `queue`, if one exists.
    pub fn group(&self, queue: &str) -> Option<&ListenerGroup> {
        self.groups.get(queue)
    }

    /// Runs the full dispatch selection (steps 1-2) for `queue`, returning
    /// the chosen connection id and its subscription handle. Returns `None`
    /// when the queue has no listener group at all, or when it has one but
    /// no member is eligible even after a sweep.
    pub fn select_next(&mut self, queue: &str) -> Option<(u64, SubscriptionHandle)> {
        let group = self.groups.get_mut(queue)?;
        let conn_id = group.select_next()?;
        let sub = group.subscription_of(conn_id)?;
        Some((conn_id, sub))
    }

    /// Records that `conn_id` on `queue` just received a message (step 3).
    pub fn mark_sent(&mut self, queue: &str, conn_id: u64) {
        if let Some(group) = self.groups.get_mut(queue) {
            group.mark_sent(conn_id);
        }
    }

    /// Moves `conn_id` on `queue` from `ready` to `blocked` if its
    /// subscription is now at prefetch capacity, without advancing the
    /// round-robin cursor. Used after SUBSCRIBE replay.
    pub fn refresh_block_state(&mut self, queue: &str, conn_id: u64) {
        if let Some(group) = self.groups.get_mut(queue) {
            group.refresh_block_state(conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Destination;
    use crate::subscription::Subscription;

    fn sub(prefetch: u32) -> SubscriptionHandle {
        Subscription::new(Destination::Queue("work".to_string()), prefetch)
    }

    fn mark_pending(sub: &SubscriptionHandle, id: &str) {
        sub.lock().unwrap().pending_acks.insert(id.to_string());
    }

    /// Scenario 2: connections A (id=1) and B (id=2), prefetch 10 each.
    /// Three dispatches go B, A, B under the descending-id order.
    #[test]
    fn round_robin_descending_by_connection_id() {
        let mut index = QueueIndex::new();
        index.attach("work", 1, sub(10));
        index.attach("work", 2, sub(10));

        let (first, s) = index.select_next("work").unwrap();
        mark_pending(&s, "m1");
        index.mark_sent("work", first);
        assert_eq!(first, 2);

        let (second, s) = index.select_next("work").unwrap();
        mark_pending(&s, "m2");
        index.mark_sent("work", second);
        assert_eq!(second, 1);

        let (third, s) = index.select_next("work").unwrap();
        mark_pending(&s, "m3");
        index.mark_sent("work", third);
        assert_eq!(third, 2);
    }

    /// Scenario 3: one subscriber, prefetch 2. m1 and m2 deliver normally;
    /// the sole member blocks after m2, but m3 still re-selects it via
    /// `full_successor` rather than finding no selectable member.
    #[test]
    fn sole_blocked_subscriber_still_receives_via_full_successor() {
        let mut index = QueueIndex::new();
        index.attach("slow", 1, sub(2));

        let (c, s) = index.select_next("slow").unwrap();
        mark_pending(&s, "m1");
        index.mark_sent("slow", c);
        assert_eq!(c, 1);

        let (c, s) = index.select_next("slow").unwrap();
        mark_pending(&s, "m2");
        index.mark_sent("slow", c);
        assert_eq!(c, 1);
        assert!(s.lock().unwrap().is_blocked());

        let (c, _) = index.select_next("slow").unwrap();
        assert_eq!(c, 1);
    }

    #[test]
    fn group_is_removed_once_empty() {
        let mut index = QueueIndex::new();
        index.attach("work", 1, sub(10));
        assert!(index.contains("work"));
        index.detach("work", 1);
        assert!(!index.contains("work"));
    }

    #[test]
    fn detach_on_unknown_queue_is_a_no_op() {
        let mut index = QueueIndex::new();
        index.detach("nonexistent", 1);
        assert!(!index.contains("nonexistent"));
    }

    #[test]
    fn select_next_on_empty_queue_is_none() {
        let mut index = QueueIndex::new();
        assert!(index.select_next("ghost").is_none());
    }
}
