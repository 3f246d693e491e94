//! Process entry point: parses CLI flags, initializes logging, builds the
//! persistence pool, binds the listener, and runs the accept loop until
//! `Ctrl+C`.

mod codec;
mod config;
mod connection_task;
mod logging;

use std::sync::Arc;

use broker_core::{Dispatcher, PostgresStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1);
    let config = match config::parse(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    logging::init();

    let store = PostgresStore::connect(&config.database_url(), 10).await?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(store)));

    let listener = bind_listener(config.port).await?;
    tracing::info!(port = config.port, "broker listening");

    let newline_after_null = config.newline_after_null;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                tracing::info!(%peer, "accepted connection");
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(connection_task::run(socket, dispatcher, newline_after_null));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    Ok(())
}

/// Binds an IPv4 wildcard listener on `port` with backlog 1024 and
/// `SO_REUSEADDR` enabled, per the listen-address contract.
async fn bind_listener(port: u16) -> anyhow::Result<TcpListener> {
    let socket = tokio::net::TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(([0, 0, 0, 0], port).into())?;
    Ok(socket.listen(1024)?)
}
