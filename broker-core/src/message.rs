//! Message identity and destination types shared by the dispatch engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A parsed `destination` header: either a fan-out topic or a fair-share queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A fan-out destination, addressed on the wire as `/topic/<name>`.
    Topic(String),
    /// A fair-share, prefetch-limited destination, addressed as `/queue/<name>`.
    Queue(String),
}

impl Destination {
    /// Parses a raw `destination` header value.
    ///
    /// Valid forms are `/topic/<name>` and `/queue/<name>`; anything else is
    /// rejected, matching the error text required by the wire contract.
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        if let Some(name) = raw.strip_prefix("/topic/") {
            Ok(Destination::Topic(name.to_string()))
        } else if let Some(name) = raw.strip_prefix("/queue/") {
            Ok(Destination::Queue(name.to_string()))
        } else {
            Err("Invalid or missing destination: must be of the form /queue/xxx or /topic/xxx.")
        }
    }

    /// The bare name, without the `/topic/` or `/queue/` prefix.
    pub fn name(&self) -> &str {
        match self {
            Destination::Topic(name) | Destination::Queue(name) => name,
        }
    }

    /// Reconstructs the wire form, e.g. `/queue/work`.
    pub fn to_wire(&self) -> String {
        match self {
            Destination::Topic(name) => format!("/topic/{name}"),
            Destination::Queue(name) => format!("/queue/{name}"),
        }
    }
}

/// A message in flight or spilled to persistence.
#[derive(Debug, Clone)]
pub struct Message {
    /// Globally unique (per broker run) message id.
    pub id: String,
    /// Where this message is addressed.
    pub destination: Destination,
    /// Dispatch/replay ordering priority; lower sorts first.
    pub priority: i32,
    /// Seconds since the Unix epoch, used as the secondary replay ordering key.
    pub timestamp: f64,
    /// Opaque message payload.
    pub body: Vec<u8>,
}

/// Mints broker-local message ids of the form `msg-<unix-seconds>-<counter>`.
///
/// The counter guarantees uniqueness even when two ids are minted within the
/// same wall-clock tick.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    counter: AtomicU64,
}

impl MessageIdGenerator {
    /// Creates a fresh generator starting its counter at zero.
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Mints the next id, unique for the lifetime of this generator.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("msg-{}-{}", now_unix_seconds(), n)
    }
}

/// Seconds since the Unix epoch, as a float (sub-second precision retained
/// for timestamp ordering of messages created within the same second).
pub fn now_unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_topic_and_queue_destinations() {
        assert_eq!(Destination::parse("/topic/news").unwrap(), Destination::Topic("news".to_string()));
        assert_eq!(Destination::parse("/queue/work").unwrap(), Destination::Queue("work".to_string()));
    }

    #[test]
    fn rejects_anything_without_a_recognized_prefix() {
        let err = Destination::parse("news").unwrap_err();
        assert_eq!(err, "Invalid or missing destination: must be of the form /queue/xxx or /topic/xxx.");
    }

    #[test]
    fn to_wire_reconstructs_the_original_form() {
        assert_eq!(Destination::Queue("work".to_string()).to_wire(), "/queue/work");
        assert_eq!(Destination::Topic("news".to_string()).to_wire(), "/topic/news");
    }

    #[test]
    fn message_ids_are_unique_across_calls() {
        let gen = MessageIdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        assert!(a.starts_with("msg-"));
    }
}
