//! Command Dispatch Table: maps uppercased STOMP command names to handlers
//! and wraps each of them (DISCONNECT excepted) in receipt acknowledgement.

use crate::dispatcher::Dispatcher;
use crate::error::BrokerError;
use crate::frame::Frame;
use crate::message::{now_unix_seconds, Destination, Message};

const BAD_DESTINATION: &str = "Invalid or missing destination: must be of the form /queue/xxx or /topic/xxx.";

/// What the connection task should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Keep reading frames from this connection.
    Continue,
    /// The session is over; tear the connection down.
    Disconnect,
}

/// Looks up `frame.command` (case-insensitively) in the dispatch table,
/// runs its handler, and — for every command but DISCONNECT — emits a
/// RECEIPT afterward if the frame carried a `receipt` header and the
/// handler did not itself emit an ERROR.
///
/// An unknown command elicits an ERROR frame naming it and the connection
/// continues. A `BrokerError` escaping a handler (currently only possible
/// from a persistence failure) propagates to the caller, which tears the
/// connection down — see the error handling design for why persistence
/// failures are connection-level rather than protocol-level errors.
pub async fn handle_frame(
    dispatcher: &Dispatcher,
    conn_id: u64,
    frame: &Frame,
) -> Result<HandlerOutcome, BrokerError> {
    let command = frame.command.to_uppercase();
    let receipt = frame.header("receipt").map(str::to_string);

    if command == "DISCONNECT" {
        return Ok(HandlerOutcome::Disconnect);
    }

    let emitted_error = match command.as_str() {
        "CONNECT" | "STOMP" => {
            dispatcher.send_frame(conn_id, Frame::connected(conn_id)).await;
            false
        }
        "SUBSCRIBE" => handle_subscribe(dispatcher, conn_id, frame).await?,
        "UNSUBSCRIBE" => handle_unsubscribe(dispatcher, conn_id, frame).await,
        "SEND" => handle_send(dispatcher, conn_id, frame).await?,
        "BEGIN" | "COMMIT" | "ABORT" => false,
        other => {
            dispatcher
                .send_frame(conn_id, Frame::error(&format!("Unknown command: {other}")))
                .await;
            true
        }
    };

    if !emitted_error {
        if let Some(receipt_id) = receipt {
            dispatcher.send_frame(conn_id, Frame::receipt(&receipt_id)).await;
        }
    }

    Ok(HandlerOutcome::Continue)
}

fn parse_destination(frame: &Frame) -> Option<Destination> {
    frame.header("destination").and_then(|raw| Destination::parse(raw).ok())
}

async fn handle_subscribe(dispatcher: &Dispatcher, conn_id: u64, frame: &Frame) -> Result<bool, BrokerError> {
    match parse_destination(frame) {
        Some(destination) => {
            dispatcher.subscribe(conn_id, destination).await?;
            Ok(false)
        }
        None => {
            dispatcher.send_frame(conn_id, Frame::error(BAD_DESTINATION)).await;
            Ok(true)
        }
    }
}

async fn handle_unsubscribe(dispatcher: &Dispatcher, conn_id: u64, frame: &Frame) -> bool {
    match parse_destination(frame) {
        Some(destination) => {
            dispatcher.unsubscribe(conn_id, &destination).await;
            false
        }
        None => {
            dispatcher.send_frame(conn_id, Frame::error(BAD_DESTINATION)).await;
            true
        }
    }
}

async fn handle_send(dispatcher: &Dispatcher, conn_id: u64, frame: &Frame) -> Result<bool, BrokerError> {
    match parse_destination(frame) {
        Some(destination) => {
            let id = format!("conn-{}:{}", conn_id, dispatcher.next_message_id());
            let message = Message {
                id,
                destination,
                priority: 0,
                timestamp: now_unix_seconds(),
                body: frame.body.clone(),
            };
            dispatcher.publish(message).await?;
            Ok(false)
        }
        None => {
            dispatcher.send_frame(conn_id, Frame::error(BAD_DESTINATION)).await;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{PersistedMessage, PersistenceError, PersistenceStore};
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    #[derive(Default)]
    struct NullStore;

    #[async_trait::async_trait]
    impl PersistenceStore for NullStore {
        async fn insert_message(&self, _message: &Message) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn fetch_messages_for_destination(
            &self,
            _destination: &str,
            _limit: u32,
        ) -> Result<Vec<PersistedMessage>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    async fn dispatcher_with_connection() -> (Dispatcher, u64, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let dispatcher = Dispatcher::new(Arc::new(NullStore));
        let (tx, rx) = unbounded_channel();
        let conn_id = dispatcher.connect(tx).await;
        (dispatcher, conn_id, rx)
    }

    #[tokio::test]
    async fn bad_destination_on_subscribe_yields_error_and_no_receipt() {
        let (dispatcher, conn_id, mut rx) = dispatcher_with_connection().await;
        let frame = Frame::new("SUBSCRIBE")
            .with_header("destination", "not-a-destination")
            .with_header("receipt", "r1");

        let outcome = handle_frame(&dispatcher, conn_id, &frame).await.unwrap();
        assert_eq!(outcome, HandlerOutcome::Continue);

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, "ERROR");
        assert_eq!(reply.body, BAD_DESTINATION.as_bytes());
        // No receipt should follow an ERROR.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn successful_subscribe_with_receipt_header_emits_receipt() {
        let (dispatcher, conn_id, mut rx) = dispatcher_with_connection().await;
        let frame = Frame::new("SUBSCRIBE")
            .with_header("destination", "/topic/news")
            .with_header("receipt", "r1");

        handle_frame(&dispatcher, conn_id, &frame).await.unwrap();
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, "RECEIPT");
        assert_eq!(reply.header("receipt-id"), Some("r1"));
    }

    #[tokio::test]
    async fn unknown_command_yields_error_naming_it() {
        let (dispatcher, conn_id, mut rx) = dispatcher_with_connection().await;
        let frame = Frame::new("FROB");
        handle_frame(&dispatcher, conn_id, &frame).await.unwrap();
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, "ERROR");
        assert_eq!(reply.body, b"Unknown command: FROB");
    }

    #[tokio::test]
    async fn disconnect_bypasses_receipt_wrapping() {
        let (dispatcher, conn_id, mut rx) = dispatcher_with_connection().await;
        let frame = Frame::new("DISCONNECT").with_header("receipt", "r1");
        let outcome = handle_frame(&dispatcher, conn_id, &frame).await.unwrap();
        assert_eq!(outcome, HandlerOutcome::Disconnect);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn begin_commit_abort_are_no_ops_that_still_receipt() {
        let (dispatcher, conn_id, mut rx) = dispatcher_with_connection().await;
        for command in ["BEGIN", "COMMIT", "ABORT"] {
            let frame = Frame::new(command).with_header("receipt", "r1");
            handle_frame(&dispatcher, conn_id, &frame).await.unwrap();
            let reply = rx.recv().await.unwrap();
            assert_eq!(reply.command, "RECEIPT");
        }
    }
}
