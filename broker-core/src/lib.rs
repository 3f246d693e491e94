//! # Destination Dispatch Engine
//!
//! This crate is the heart of the broker: the data structures and
//! algorithms that route an incoming published frame to either a fan-out
//! topic or a fair-share queue, apply per-subscription prefetch-based flow
//! control, round-robin across eligible queue consumers, and spill
//! undeliverable queue messages to durable storage for replay.
//!
//! ## Core Components
//!
//! - **`connection`**: the Connection Registry — the set of live client
//!   sessions and their local subscription maps.
//! - **`topic_index`**: best-effort fan-out membership per topic.
//! - **`queue_index`**: the round-robin cursor and ready/blocked flow
//!   control state per queue — the hardest part of the engine.
//! - **`dispatcher`**: the public entry points (`publish`, `subscribe`,
//!   `unsubscribe`, `disconnect`) that tie the above together with the
//!   persistence adapter.
//! - **`command_table`**: maps STOMP command names to handlers and wraps
//!   them in receipt acknowledgement.
//! - **`persistence`**: the `PersistenceStore` trait and its PostgreSQL
//!   implementation, the durable overflow path for queue messages.
//! - **`frame`** / **`message`**: the shared wire-frame and message types.
//!
//! The byte-level STOMP codec and the TCP accept loop are deliberately not
//! part of this crate — they live in the `broker-server` binary crate,
//! which drives a `Dispatcher` over real sockets.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Maps STOMP command names to handlers, with receipt wrapping.
pub mod command_table;
/// The Connection Registry.
pub mod connection;
/// The destination dispatch engine's public entry points.
pub mod dispatcher;
/// Shared error type for codec, persistence, and protocol failures.
pub mod error;
/// The STOMP frame type.
pub mod frame;
/// Message identity and destination parsing.
pub mod message;
/// The relational persistence adapter.
pub mod persistence;
/// Per-queue listener groups and round-robin dispatch.
pub mod queue_index;
/// A single consumer's binding to one destination.
pub mod subscription;
/// Per-topic fan-out membership.
pub mod topic_index;

pub use command_table::{handle_frame, HandlerOutcome};
pub use connection::{ConnectionEntry, ConnectionRegistry, FrameSender};
pub use dispatcher::Dispatcher;
pub use error::BrokerError;
pub use frame::Frame;
pub use message::{Destination, Message, MessageIdGenerator};
pub use persistence::{PersistedMessage, PersistenceError, PersistenceStore, PostgresStore};
pub use subscription::{Subscription, SubscriptionHandle, DEFAULT_PREFETCH};
