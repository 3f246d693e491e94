//! Topic Index: best-effort fan-out membership, no flow control.

use std::collections::{BTreeSet, HashMap};

/// For each topic name, the set of connections currently subscribed.
///
/// Entries are created on first `add` and dropped as soon as their member
/// set empties, so a topic nobody listens to costs nothing.
#[derive(Default)]
pub struct TopicIndex {
    topics: HashMap<String, BTreeSet<u64>>,
}

impl TopicIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            topics: HashMap::new(),
        }
    }

    /// Inserts `conn_id` into `topic`'s member set, creating the entry if
    /// this is the topic's first subscriber.
    pub fn add(&mut self, topic: &str, conn_id: u64) {
        self.topics.entry(topic.to_string()).or_default().insert(conn_id);
    }

    /// Removes `conn_id` from `topic`'s member set. Drops the entry if the
    /// set becomes empty. A no-op if either the topic or the member is
    /// already absent.
    pub fn remove(&mut self, topic: &str, conn_id: u64) {
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Removes `conn_id` from every topic it belongs to. Used by connection
    /// teardown, which already knows the affected topic names from the
    /// connection's own local map and so does not need to scan here — this
    /// is a convenience for callers that only have the id.
    pub fn remove_from_all(&mut self, conn_id: u64) {
        self.topics.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Enumerates the current members of `topic`, for fan-out. Returns an
    /// empty iterator for an unknown topic.
    pub fn members(&self, topic: &str) -> impl Iterator<Item = u64> + '_ {
        self.topics
            .get(topic)
            .into_iter()
            .flat_map(|members| members.iter().copied())
    }

    /// True iff `topic` has at least one subscriber.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_enumerates_all_members() {
        let mut index = TopicIndex::new();
        index.add("news", 1);
        index.add("news", 2);
        let mut members: Vec<u64> = index.members("news").collect();
        members.sort();
        assert_eq!(members, vec![1, 2]);
    }

    #[test]
    fn entry_is_dropped_once_empty() {
        let mut index = TopicIndex::new();
        index.add("news", 1);
        index.remove("news", 1);
        assert!(!index.contains("news"));
        assert_eq!(index.members("news").count(), 0);
    }

    #[test]
    fn remove_from_all_clears_every_topic() {
        let mut index = TopicIndex::new();
        index.add("news", 1);
        index.add("sports", 1);
        index.add("sports", 2);
        index.remove_from_all(1);
        assert!(!index.contains("news"));
        assert!(index.contains("sports"));
        assert_eq!(index.members("sports").collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn unknown_topic_has_no_members() {
        let index = TopicIndex::new();
        assert_eq!(index.members("ghost").count(), 0);
    }
}
