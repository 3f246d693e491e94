//! Per-connection task: the handshake check, the frame-decode/dispatch loop,
//! and the dedicated writer task that owns the socket's write half.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use broker_core::{handle_frame, Dispatcher, Frame, HandlerOutcome};

use crate::codec::StompCodec;

const BAD_HANDSHAKE: &str = "Excepted CONNECT frame.";

/// Drives one accepted TCP connection end to end: handshake, dispatch loop,
/// and unregistration on teardown. Never panics; any socket or protocol
/// failure ends the task and tears the connection down via the dispatcher.
pub async fn run(socket: TcpStream, dispatcher: Arc<Dispatcher>, newline_after_null: bool) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FramedRead::new(read_half, StompCodec::new(newline_after_null));
    let mut writer = FramedWrite::new(write_half, StompCodec::new(newline_after_null));

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.send(frame).await.is_err() {
                break;
            }
        }
    });

    let first_frame = match reader.next().await {
        Some(Ok(frame)) => frame,
        _ => {
            writer_task.abort();
            return;
        }
    };

    if !matches!(first_frame.command.to_uppercase().as_str(), "CONNECT" | "STOMP") {
        let _ = tx.send(Frame::error(BAD_HANDSHAKE));
        drop(tx);
        let _ = writer_task.await;
        return;
    }

    let conn_id = dispatcher.connect(tx).await;
    tracing::info!(conn_id, "handshake accepted");

    if let Err(e) = handle_frame(&dispatcher, conn_id, &first_frame).await {
        tracing::error!(conn_id, error = %e, "error handling CONNECT frame");
        dispatcher.disconnect(conn_id).await;
        writer_task.abort();
        return;
    }

    while let Some(result) = reader.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "frame decode error, closing connection");
                break;
            }
        };

        match handle_frame(&dispatcher, conn_id, &frame).await {
            Ok(HandlerOutcome::Continue) => {}
            Ok(HandlerOutcome::Disconnect) => break,
            Err(e) => {
                tracing::error!(conn_id, error = %e, "dispatch error, closing connection");
                break;
            }
        }
    }

    dispatcher.disconnect(conn_id).await;
    tracing::info!(conn_id, "connection closed");
    writer_task.abort();
}
